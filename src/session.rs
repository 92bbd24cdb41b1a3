// =============================================================================
// Session Manager — per-user signal session lifecycle and routing
// =============================================================================
//
// A session is one (chat, symbol, timeframe) subscription. The manager owns
// the session table exclusively, seeds the aggregator with history on start,
// routes feed ticks into the aggregator, and reacts to candle-close events
// with at-most-once signal generation per (session, candle).
//
// The win/loss tracker is decoupled through the event bus: the manager
// publishes signals and consumes trade results without ever holding a
// tracker reference.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event_bus::{EventBus, SessionEvent, SignalEvent, VolatilityWarningEvent, WarningKind};
use crate::feed::{FeedClient, FeedEvent};
use crate::indicators::compute_all;
use crate::market_data::{Candle, CandleAggregator, CandleKey, PriceCache};
use crate::regime;
use crate::signal::{SignalEngine, SignalOptions, SignalResult};
use crate::types::{Direction, Outcome};
use crate::volatility::{self, VolatilityCache};

/// Candle history fetched per session start.
pub const HISTORY_COUNT: usize = 300;

/// Newest signal summaries retained for the status API.
const MAX_RECENT_SIGNALS: usize = 100;

/// Compact record of one published signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSignal {
    pub session_id: String,
    pub symbol: String,
    pub timeframe: i64,
    pub direction: Direction,
    pub confidence: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Stopped,
}

/// Win/loss accumulation for one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub wins: u32,
    pub losses: u32,
    pub total_signals: u32,
}

impl SessionStats {
    pub fn record(&mut self, outcome: Outcome) {
        self.total_signals += 1;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
        }
    }

    /// Win rate in percent; 0 before any resolution.
    pub fn win_rate(&self) -> f64 {
        if self.total_signals == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_signals as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub timeframe: i64,
    pub status: SessionStatus,
    pub started_at: i64,
    pub last_signal_at: Option<i64>,
    pub preferences: SignalOptions,
    pub stats: SessionStats,
    /// Start epoch of the candle that last produced a signal — the
    /// exactly-once guard.
    pub last_signal_candle: Option<i64>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    aggregator: Arc<CandleAggregator>,
    feed: Arc<FeedClient>,
    engine: Arc<SignalEngine>,
    bus: Arc<EventBus>,
    volatility_cache: Arc<VolatilityCache>,
    price_cache: Arc<PriceCache>,
    signals_generated: AtomicU64,
    recent_signals: RwLock<Vec<RecentSignal>>,
}

impl SessionManager {
    pub fn new(
        aggregator: Arc<CandleAggregator>,
        feed: Arc<FeedClient>,
        engine: Arc<SignalEngine>,
        bus: Arc<EventBus>,
        volatility_cache: Arc<VolatilityCache>,
        price_cache: Arc<PriceCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            aggregator,
            feed,
            engine,
            bus,
            volatility_cache,
            price_cache,
            signals_generated: AtomicU64::new(0),
            recent_signals: RwLock::new(Vec::new()),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start a session: fetch history, seed the aggregator, subscribe ticks.
    pub async fn start(
        &self,
        chat_id: i64,
        symbol: &str,
        timeframe: i64,
        preferences: SignalOptions,
        now_epoch: i64,
    ) -> Result<Session> {
        let history = self
            .feed
            .fetch_candle_history(symbol, timeframe, HISTORY_COUNT)
            .await
            .with_context(|| format!("history fetch failed for {symbol}@{timeframe}s"))?;

        self.start_with_history(chat_id, symbol, timeframe, preferences, history, now_epoch)
    }

    /// Session start with history already in hand. Split out so the
    /// feed-independent part is directly exercisable.
    pub fn start_with_history(
        &self,
        chat_id: i64,
        symbol: &str,
        timeframe: i64,
        preferences: SignalOptions,
        history: Vec<Candle>,
        now_epoch: i64,
    ) -> Result<Session> {
        {
            let sessions = self.sessions.read();
            let duplicate = sessions.values().any(|s| {
                s.is_active()
                    && s.chat_id == chat_id
                    && s.symbol == symbol
                    && s.timeframe == timeframe
            });
            if duplicate {
                bail!("a session for {symbol}@{timeframe}s is already running in this chat");
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            chat_id,
            symbol: symbol.to_string(),
            timeframe,
            status: SessionStatus::Active,
            started_at: now_epoch,
            last_signal_at: None,
            preferences,
            stats: SessionStats::default(),
            last_signal_candle: None,
        };

        // Pre-session volatility read, cached for the API and warned about
        // when already hostile.
        if let Some(analysis) = volatility::analyze(symbol, &history) {
            let warn_now = analysis.is_volatile;
            self.volatility_cache.update(analysis);
            if warn_now {
                self.bus.publish_warning(VolatilityWarningEvent {
                    session_id: session.id.clone(),
                    chat_id,
                    symbol: symbol.to_string(),
                    kind: WarningKind::PreSession,
                });
            }
        }

        self.aggregator
            .initialize(symbol, timeframe, history, HISTORY_COUNT);
        self.feed.subscribe_ticks(symbol, &session.id);

        info!(
            session_id = %session.id,
            chat_id,
            symbol,
            timeframe,
            "session started"
        );
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        self.bus.publish_session(SessionEvent::Started(session.clone()));
        Ok(session)
    }

    /// Stop a session. Idempotent: stopping an unknown or already-stopped
    /// session is a no-op returning `false`.
    pub fn stop(&self, session_id: &str) -> bool {
        let stopped = {
            let mut sessions = self.sessions.write();
            match sessions.get_mut(session_id) {
                Some(session) if session.is_active() => {
                    session.status = SessionStatus::Stopped;
                    Some(session.clone())
                }
                _ => None,
            }
        };

        let Some(session) = stopped else {
            return false;
        };

        self.feed.unsubscribe_ticks(&session.symbol, session_id);

        // Release the candle series only when no other session needs it.
        let pair_in_use = self.sessions.read().values().any(|s| {
            s.is_active() && s.symbol == session.symbol && s.timeframe == session.timeframe
        });
        if !pair_in_use {
            self.aggregator.cleanup(&session.symbol, session.timeframe);
        }

        info!(session_id, symbol = %session.symbol, "session stopped");
        self.bus.publish_session(SessionEvent::Stopped(session));
        true
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn sessions_for_chat(&self, chat_id: i64) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().values().filter(|s| s.is_active()).count()
    }

    pub fn signals_generated(&self) -> u64 {
        self.signals_generated.load(Ordering::Relaxed)
    }

    /// Newest published signal summaries, oldest first.
    pub fn recent_signals(&self) -> Vec<RecentSignal> {
        self.recent_signals.read().clone()
    }

    pub fn candles_snapshot(&self, session_id: &str) -> Option<(Vec<Candle>, Option<Candle>)> {
        let session = self.session(session_id)?;
        let key = CandleKey::new(&session.symbol, session.timeframe);
        Some((
            self.aggregator.get_closed(&key),
            self.aggregator.get_forming(&key),
        ))
    }

    /// Record a resolved outcome against a session's stats (driven by the
    /// trade-result listener).
    pub fn record_outcome(&self, session_id: &str, outcome: Outcome) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.stats.record(outcome);
        }
    }

    // ── Event loops ─────────────────────────────────────────────────────

    /// Route feed events: ticks into the aggregator and price cache,
    /// reconnects into re-hydration, terminal loss into teardown.
    pub async fn run_feed_router(self: Arc<Self>) {
        let mut events = self.feed.subscribe_events();
        loop {
            match events.recv().await {
                Ok(FeedEvent::Tick(tick)) => {
                    self.price_cache.update(&tick.symbol, tick.price, tick.epoch);

                    let timeframes: HashSet<i64> = self
                        .sessions
                        .read()
                        .values()
                        .filter(|s| s.is_active() && s.symbol == tick.symbol)
                        .map(|s| s.timeframe)
                        .collect();
                    for timeframe in timeframes {
                        self.aggregator.process_tick(&tick, timeframe);
                    }
                }
                Ok(FeedEvent::Connected) => {
                    if let Err(e) = self.rehydrate_all().await {
                        warn!(error = %e, "re-hydration after reconnect failed");
                    }
                }
                Ok(FeedEvent::Disconnected) => {
                    debug!("feed disconnected — awaiting reconnect");
                }
                Ok(FeedEvent::Lost) => {
                    warn!("feed terminally lost — stopping all sessions");
                    for session in self.active_sessions() {
                        self.stop(&session.id);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "feed router lagged behind the event stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Re-fetch history for every active session after a reconnect so the
    /// closed-candle rings carry no gaps.
    async fn rehydrate_all(&self) -> Result<()> {
        let pairs: HashSet<(String, i64)> = self
            .active_sessions()
            .into_iter()
            .map(|s| (s.symbol, s.timeframe))
            .collect();

        for (symbol, timeframe) in pairs {
            let history = self
                .feed
                .fetch_candle_history(&symbol, timeframe, HISTORY_COUNT)
                .await
                .with_context(|| format!("re-hydration fetch failed for {symbol}"))?;
            self.aggregator
                .initialize(&symbol, timeframe, history, HISTORY_COUNT);
            info!(symbol, timeframe, "series re-hydrated after reconnect");
        }
        Ok(())
    }

    /// React to candle-close events with signal generation.
    pub async fn run_close_listener(self: Arc<Self>) {
        let mut closes = self.aggregator.subscribe_closed();
        loop {
            match closes.recv().await {
                Ok(event) => {
                    self.handle_close(&event.key, &event.candle).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "close listener lagged; skipped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Generate and publish signals for every session watching this pair.
    /// At most one signal is ever published per (session, candle start).
    pub async fn handle_close(&self, key: &CandleKey, closed_candle: &Candle) {
        let matching: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| {
                s.is_active() && s.symbol == key.symbol && s.timeframe == key.timeframe
            })
            .cloned()
            .collect();

        if matching.is_empty() {
            return;
        }

        let closed = self.aggregator.get_closed(key);
        let forming = self.aggregator.get_forming(key);
        let candle_close_time = closed_candle.start_epoch + key.timeframe;
        let now_epoch = chrono::Utc::now().timestamp();

        for session in matching {
            // Exactly-once per (session, candle).
            if session.last_signal_candle == Some(closed_candle.start_epoch) {
                debug!(
                    session_id = %session.id,
                    candle_start = closed_candle.start_epoch,
                    "duplicate close event ignored"
                );
                continue;
            }
            {
                let mut sessions = self.sessions.write();
                match sessions.get_mut(&session.id) {
                    Some(s) if s.last_signal_candle != Some(closed_candle.start_epoch) => {
                        s.last_signal_candle = Some(closed_candle.start_epoch);
                        s.last_signal_at = Some(now_epoch);
                    }
                    _ => continue,
                }
            }

            // Signal generation is CPU work under a soft deadline of
            // min(5 s, timeframe / 2).
            let deadline =
                std::time::Duration::from_secs((key.timeframe as u64 / 2).clamp(1, 5));
            let engine = self.engine.clone();
            let closed_snapshot = closed.clone();
            let forming_snapshot = forming.clone();
            let options = session.preferences.clone();
            let session_id = session.id.clone();
            let symbol = key.symbol.clone();
            let timeframe = key.timeframe;

            let generated = tokio::time::timeout(
                deadline,
                tokio::task::spawn_blocking(move || {
                    engine.generate(
                        &session_id,
                        &symbol,
                        timeframe,
                        &closed_snapshot,
                        forming_snapshot.as_ref(),
                        candle_close_time,
                        now_epoch,
                        &options,
                    )
                }),
            )
            .await;

            let signal = match generated {
                Ok(Ok(signal)) => signal,
                Ok(Err(e)) => {
                    warn!(session_id = %session.id, error = %e, "signal generation panicked");
                    continue;
                }
                Err(_) => {
                    warn!(
                        session_id = %session.id,
                        deadline_secs = deadline.as_secs(),
                        "signal generation exceeded its deadline — cancelled"
                    );
                    continue;
                }
            };

            // Invariant guard: a signal must match its session's pair.
            if signal.symbol != session.symbol || signal.timeframe != session.timeframe {
                warn!(
                    session_id = %session.id,
                    signal_symbol = %signal.symbol,
                    "signal/session pair mismatch — dropped"
                );
                continue;
            }

            let filtered = self.post_filter(&closed, signal, &session.preferences);
            self.signals_generated.fetch_add(1, Ordering::Relaxed);
            {
                let mut recent = self.recent_signals.write();
                recent.push(RecentSignal {
                    session_id: session.id.clone(),
                    symbol: filtered.symbol.clone(),
                    timeframe: filtered.timeframe,
                    direction: filtered.direction,
                    confidence: filtered.confidence,
                    timestamp: filtered.timestamp,
                });
                while recent.len() > MAX_RECENT_SIGNALS {
                    recent.remove(0);
                }
            }
            self.bus.publish_signal(SignalEvent {
                session: self.session(&session.id).unwrap_or(session),
                signal: filtered,
            });
        }
    }

    /// The final gate between the engine's output and publication.
    fn post_filter(
        &self,
        closed: &[Candle],
        mut signal: SignalResult,
        preferences: &SignalOptions,
    ) -> SignalResult {
        // 1. Hard volatility re-check on the closed window.
        if signal.direction.is_directional() {
            if let Some(reason) = volatility::should_no_trade(closed) {
                signal.suggested_direction = Some(signal.direction);
                signal.direction = Direction::NoTrade;
                return signal.with_override(reason);
            }
        }

        // 2. Regime tradeability re-check.
        if signal.direction.is_directional() {
            let assessment = regime::assess(closed, &compute_all(closed));
            if !assessment.is_tradeable {
                signal.suggested_direction = Some(signal.direction);
                signal.direction = Direction::NoTrade;
                return signal.with_override(format!("Regime: {}", assessment.reason));
            }
        }

        // 3. Per-session confidence preference.
        if let Some(filter) = preferences.confidence_filter {
            if signal.direction.is_directional() && signal.confidence < filter as f64 {
                signal.suggested_direction = Some(signal.direction);
                signal.direction = Direction::NoTrade;
                signal.is_low_confidence = true;
                return signal;
            }
        }

        // 4. Refresh the volatility cache for the API and warning loop.
        if let Some(analysis) = volatility::analyze(&signal.symbol, closed) {
            self.volatility_cache.update(analysis);
        }

        signal
    }

    /// Fold trade results back into session statistics.
    pub async fn run_result_listener(self: Arc<Self>) {
        let mut results = self.bus.subscribe_trade_results();
        loop {
            match results.recv().await {
                Ok(event) => {
                    self.record_outcome(&event.session_id, event.outcome);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "result listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::MlEnsemble;
    use crate::thresholds::AdaptiveThresholds;

    fn trend_candle(i: usize, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: close - 0.7,
            high: close + 0.1,
            low: close - 0.8,
            close,
            start_epoch: (i as i64) * 60,
            tick_count: 10,
            is_forming: false,
        }
    }

    fn uptrend(n: usize) -> Vec<Candle> {
        (0..n).map(|i| trend_candle(i, 100.0 + i as f64 * 0.8)).collect()
    }

    fn manager() -> (Arc<SessionManager>, Arc<EventBus>, Arc<CandleAggregator>) {
        let aggregator = Arc::new(CandleAggregator::new());
        let feed = FeedClient::new("wss://example.invalid/ws", "token");
        let engine = Arc::new(SignalEngine::new(
            Arc::new(RwLock::new(MlEnsemble::new())),
            Arc::new(RwLock::new(AdaptiveThresholds::new())),
        ));
        let bus = Arc::new(EventBus::new());
        let manager = SessionManager::new(
            aggregator.clone(),
            feed,
            engine,
            bus.clone(),
            Arc::new(VolatilityCache::new()),
            Arc::new(PriceCache::new()),
        );
        (manager, bus, aggregator)
    }

    #[test]
    fn start_and_duplicate_pair_conflict() {
        let (manager, _bus, _agg) = manager();
        let session = manager
            .start_with_history(1, "R_100", 60, SignalOptions::default(), uptrend(120), 1_000)
            .unwrap();
        assert!(session.is_active());
        assert_eq!(manager.active_count(), 1);

        // Same chat + pair: rejected while the first is active.
        let conflict = manager.start_with_history(
            1,
            "R_100",
            60,
            SignalOptions::default(),
            uptrend(120),
            1_001,
        );
        assert!(conflict.is_err());

        // Different timeframe is fine.
        let other = manager.start_with_history(
            1,
            "R_100",
            300,
            SignalOptions::default(),
            uptrend(120),
            1_002,
        );
        assert!(other.is_ok());
    }

    #[test]
    fn stop_is_idempotent_and_irreversible() {
        let (manager, _bus, agg) = manager();
        let session = manager
            .start_with_history(1, "R_100", 60, SignalOptions::default(), uptrend(120), 1_000)
            .unwrap();

        assert!(manager.stop(&session.id));
        assert!(!manager.stop(&session.id));
        assert!(!manager.stop("nonexistent"));
        assert_eq!(manager.active_count(), 0);
        assert_eq!(
            manager.session(&session.id).unwrap().status,
            SessionStatus::Stopped
        );
        // Series released once nobody uses the pair.
        assert!(!agg.has_series(&CandleKey::new("R_100", 60)));

        // A stopped session frees the pair for a fresh start.
        assert!(manager
            .start_with_history(1, "R_100", 60, SignalOptions::default(), uptrend(120), 2_000)
            .is_ok());
    }

    #[tokio::test]
    async fn duplicate_close_events_emit_one_signal() {
        let (manager, bus, _agg) = manager();
        let mut signals = bus.subscribe_signals();

        manager
            .start_with_history(1, "R_100", 60, SignalOptions::default(), uptrend(120), 1_000)
            .unwrap();

        let key = CandleKey::new("R_100", 60);
        let last = trend_candle(119, 100.0 + 119.0 * 0.8);

        manager.handle_close(&key, &last).await;
        manager.handle_close(&key, &last).await;

        // Exactly one signal event regardless of the duplicate close.
        assert!(signals.try_recv().is_ok());
        assert!(signals.try_recv().is_err());
        assert_eq!(manager.signals_generated(), 1);
        assert_eq!(manager.recent_signals().len(), 1);
    }

    #[tokio::test]
    async fn close_for_unwatched_pair_is_ignored() {
        let (manager, bus, _agg) = manager();
        let mut signals = bus.subscribe_signals();
        let key = CandleKey::new("R_50", 60);
        manager.handle_close(&key, &trend_candle(10, 100.0)).await;
        assert!(signals.try_recv().is_err());
    }

    #[test]
    fn confidence_filter_downgrades_signal() {
        let (manager, _bus, _agg) = manager();
        let closed = uptrend(120);

        let mut signal = SignalResult::no_trade("s1", "R_100", 60, 1_000, 960, 120);
        signal.direction = Direction::Call;
        signal.confidence = 85.0;

        let preferences = SignalOptions {
            confidence_filter: Some(95),
            ..Default::default()
        };
        let filtered = manager.post_filter(&closed, signal, &preferences);
        assert_eq!(filtered.direction, Direction::NoTrade);
        assert!(filtered.is_low_confidence);
        assert_eq!(filtered.suggested_direction, Some(Direction::Call));
    }

    #[test]
    fn stats_accumulate_and_win_rate() {
        let (manager, _bus, _agg) = manager();
        let session = manager
            .start_with_history(1, "R_100", 60, SignalOptions::default(), uptrend(120), 1_000)
            .unwrap();

        manager.record_outcome(&session.id, Outcome::Win);
        let stats = manager.session(&session.id).unwrap().stats;
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 0);
        assert_eq!(stats.total_signals, 1);
        assert_eq!(stats.win_rate(), 100.0);

        manager.record_outcome(&session.id, Outcome::Loss);
        let stats = manager.session(&session.id).unwrap().stats;
        assert_eq!(stats.win_rate(), 50.0);
    }
}
