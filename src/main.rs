// =============================================================================
// SignalForge — Main Entry Point
// =============================================================================
//
// Boot order: config → shared state → feed connection → event loops →
// status API → optional bootstrap sessions → wait for Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod event_bus;
mod feed;
mod indicators;
mod market_data;
mod ml;
mod patterns;
mod regime;
mod session;
mod signal;
mod thresholds;
mod tracker;
mod types;
mod volatility;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::AppConfig;
use crate::signal::SignalOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("SignalForge starting up");

    let config = AppConfig::from_env()?;
    info!(
        endpoint = %config.feed_endpoint,
        port = config.port,
        bootstrap = config.bootstrap_sessions.len(),
        "configuration loaded"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = AppState::new(config);

    // ── 3. Feed connection ───────────────────────────────────────────────
    tokio::spawn(state.feed.clone().run());

    // ── 4. Core event loops ──────────────────────────────────────────────
    tokio::spawn(state.sessions.clone().run_feed_router());
    tokio::spawn(state.sessions.clone().run_close_listener());
    tokio::spawn(state.sessions.clone().run_result_listener());
    tokio::spawn(state.tracker.clone().run_intake());
    tokio::spawn(state.tracker.clone().run_poll_loop());
    tokio::spawn(state.tracker.clone().run_volatility_loop());
    info!("core event loops running");

    // ── 5. Status API ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = format!("0.0.0.0:{}", state.config.port);
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "status API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "status API failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status API"),
        }
    });

    // ── 6. Bootstrap sessions ────────────────────────────────────────────
    // Give the feed a moment to authorize before history fetches go out.
    if !state.config.bootstrap_sessions.is_empty() {
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        for bootstrap in &state.config.bootstrap_sessions {
            let now = chrono::Utc::now().timestamp();
            match state
                .sessions
                .start(
                    bootstrap.chat_id,
                    &bootstrap.symbol,
                    bootstrap.timeframe,
                    SignalOptions::default(),
                    now,
                )
                .await
            {
                Ok(session) => info!(
                    session_id = %session.id,
                    symbol = %bootstrap.symbol,
                    timeframe = bootstrap.timeframe,
                    "bootstrap session started"
                ),
                Err(e) => warn!(
                    symbol = %bootstrap.symbol,
                    error = %e,
                    "bootstrap session failed to start"
                ),
            }
        }
    }

    info!("all subsystems running — Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    for session in state.sessions.active_sessions() {
        state.sessions.stop(&session.id);
    }
    info!("SignalForge shut down complete");
    Ok(())
}
