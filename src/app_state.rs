// =============================================================================
// Central Application State
// =============================================================================
//
// The composition root for the engine. All subsystems are built here and
// shared through `Arc`; AppState keeps the handles the runtime loops and the
// HTTP status API consume, and builds the serialisable status snapshot.
//
// Thread safety:
//   - parking_lot::RwLock around the ML ensemble and adaptive thresholds
//     (process-wide singletons with serialized mutation).
//   - Subsystem engines manage their own interior mutability behind Arc.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::AppConfig;
use crate::event_bus::EventBus;
use crate::feed::FeedClient;
use crate::market_data::{CandleAggregator, PriceCache};
use crate::ml::MlEnsemble;
use crate::session::SessionManager;
use crate::signal::SignalEngine;
use crate::thresholds::AdaptiveThresholds;
use crate::tracker::WinLossTracker;
use crate::volatility::VolatilityCache;

pub struct AppState {
    pub config: AppConfig,
    pub feed: Arc<FeedClient>,
    pub ml: Arc<RwLock<MlEnsemble>>,
    pub thresholds: Arc<RwLock<AdaptiveThresholds>>,
    pub volatility_cache: Arc<VolatilityCache>,
    pub sessions: Arc<SessionManager>,
    pub tracker: Arc<WinLossTracker>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the full engine together from its configuration.
    pub fn new(config: AppConfig) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let aggregator = Arc::new(CandleAggregator::new());
        let feed = FeedClient::new(config.feed_endpoint.clone(), config.feed_token.clone());
        let ml = Arc::new(RwLock::new(MlEnsemble::new()));
        let thresholds = Arc::new(RwLock::new(AdaptiveThresholds::new()));
        let volatility_cache = Arc::new(VolatilityCache::new());
        let price_cache = Arc::new(PriceCache::new());
        let engine = Arc::new(SignalEngine::new(ml.clone(), thresholds.clone()));

        let sessions = SessionManager::new(
            aggregator,
            feed.clone(),
            engine,
            bus.clone(),
            volatility_cache.clone(),
            price_cache.clone(),
        );
        let tracker = WinLossTracker::new(
            price_cache,
            volatility_cache.clone(),
            ml.clone(),
            thresholds.clone(),
            bus,
        );

        Arc::new(Self {
            config,
            feed,
            ml,
            thresholds,
            volatility_cache,
            sessions,
            tracker,
            start_time: std::time::Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Build the status payload for `GET /api/bot/status`.
    pub fn build_status(&self) -> StatusSnapshot {
        let sessions = self.sessions.active_sessions();
        let total_users: HashSet<i64> = sessions.iter().map(|s| s.chat_id).collect();

        let volatility_data = self
            .volatility_cache
            .all()
            .into_iter()
            .map(|a| VolatilityEntry {
                symbol: a.symbol.clone(),
                volatility_score: a.volatility_score,
                is_stable: a.is_stable(),
                severity: a.severity().to_string(),
            })
            .collect();

        StatusSnapshot {
            status: "running",
            uptime_seconds: self.uptime_seconds(),
            total_users: total_users.len(),
            active_sessions: sessions.len(),
            signals_generated: self.sessions.signals_generated(),
            users_accepted_terms: total_users.len(),
            pending_signals: self.tracker.pending_count(),
            ml_rolling_accuracy: self.ml.read().rolling_accuracy(),
            min_confidence_gate: self.thresholds.read().current().min_confidence,
            last_volatility_update: self.volatility_cache.last_update(),
            volatility_data,
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct VolatilityEntry {
    pub symbol: String,
    pub volatility_score: f64,
    pub is_stable: bool,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub total_users: usize,
    pub active_sessions: usize,
    pub signals_generated: u64,
    pub users_accepted_terms: usize,
    pub pending_signals: usize,
    pub ml_rolling_accuracy: f64,
    pub min_confidence_gate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_volatility_update: Option<i64>,
    pub volatility_data: Vec<VolatilityEntry>,
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn config() -> AppConfig {
        AppConfig {
            feed_endpoint: "wss://example.invalid/ws".into(),
            feed_token: "token".into(),
            database_url: None,
            session_secret: None,
            port: 5000,
            bootstrap_sessions: Vec::new(),
        }
    }

    #[test]
    fn fresh_state_builds_empty_status() {
        let state = AppState::new(config());
        let status = state.build_status();
        assert_eq!(status.status, "running");
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.total_users, 0);
        assert_eq!(status.signals_generated, 0);
        assert_eq!(status.pending_signals, 0);
        assert_eq!(status.min_confidence_gate, 72.0);
        assert!(status.volatility_data.is_empty());
        assert!(status.last_volatility_update.is_none());
    }

    #[test]
    fn status_reflects_sessions_and_volatility() {
        let state = AppState::new(config());

        let history: Vec<crate::market_data::Candle> = (0..120)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.2;
                crate::market_data::Candle {
                    symbol: "R_100".into(),
                    timeframe: 60,
                    open: close - 0.15,
                    high: close + 0.2,
                    low: close - 0.2,
                    close,
                    start_epoch: (i as i64) * 60,
                    tick_count: 10,
                    is_forming: false,
                }
            })
            .collect();

        state
            .sessions
            .start_with_history(
                7,
                "R_100",
                60,
                crate::signal::SignalOptions::default(),
                history,
                1_000,
            )
            .unwrap();

        let status = state.build_status();
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.total_users, 1);
        // The session start analysed and cached the symbol's volatility.
        assert_eq!(status.volatility_data.len(), 1);
        assert!(status.last_volatility_update.is_some());
    }
}
