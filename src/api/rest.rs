// =============================================================================
// REST Status Endpoints — Axum 0.7
// =============================================================================
//
//   GET /api/bot/status          — full engine snapshot
//   GET /api/health              — liveness probe
//   GET /api/volatility          — all cached volatility analyses
//   GET /api/volatility/:symbol  — one symbol's analysis (404 when unknown)
//
// CORS is configured permissively; the status surface is read-only.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the status API router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/bot/status", get(bot_status))
        .route("/api/health", get(health))
        .route("/api/volatility", get(volatility_all))
        .route("/api/volatility/:symbol", get(volatility_symbol))
        .layer(cors)
        .with_state(state)
}

async fn bot_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_status())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    uptime: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().timestamp(),
        uptime: state.uptime_seconds(),
    })
}

async fn volatility_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.volatility_cache.all())
}

async fn volatility_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.volatility_cache.get(&symbol) {
        Some(analysis) => Json(analysis).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown symbol {symbol}") })),
        )
            .into_response(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        AppState::new(AppConfig {
            feed_endpoint: "wss://example.invalid/ws".into(),
            feed_token: "token".into(),
            database_url: None,
            session_secret: None,
            port: 5000,
            bootstrap_sessions: Vec::new(),
        })
    }

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn health_and_status_respond_ok() {
        let router = router(state());
        assert_eq!(get_status(router.clone(), "/api/health").await, StatusCode::OK);
        assert_eq!(get_status(router, "/api/bot/status").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn volatility_unknown_symbol_is_404() {
        let router = router(state());
        assert_eq!(get_status(router.clone(), "/api/volatility").await, StatusCode::OK);
        assert_eq!(
            get_status(router, "/api/volatility/NOPE").await,
            StatusCode::NOT_FOUND
        );
    }
}
