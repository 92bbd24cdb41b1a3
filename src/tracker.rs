// =============================================================================
// Win/Loss Tracker — pending-signal resolution at expiry
// =============================================================================
//
// Holds every directional signal until its expiry epoch, then resolves it
// against the latest cached price:
//
//   CALL wins when exit > entry, PUT wins when exit < entry, ties lose.
//
// Resolution feeds the ML ensemble (with the feature snapshot the signal
// carried) and the adaptive thresholds, then publishes a trade result on the
// bus. A bounded processed-set rejects duplicate expirations; a missing
// price skips the signal with a warning and never re-enqueues it.
//
// A second loop re-checks volatility every 5 seconds and pushes in-session
// warnings, capped at 3 per session and spaced at least 60 s apart.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::event_bus::{
    EventBus, SessionEvent, SignalEvent, TradeResultEvent, VolatilityWarningEvent, WarningKind,
};
use crate::market_data::PriceCache;
use crate::ml::{FeatureSnapshot, MlEnsemble};
use crate::thresholds::AdaptiveThresholds;
use crate::types::{Direction, Outcome};
use crate::volatility::VolatilityCache;

/// Poll cadence for expiry resolution.
const POLL_INTERVAL_SECS: u64 = 1;

/// Cadence for the in-session volatility re-check.
const VOLATILITY_RECHECK_SECS: u64 = 5;

/// Newest resolved keys remembered for duplicate rejection.
const PROCESSED_CAPACITY: usize = 1000;

/// Warning pacing per session.
const WARNING_SPACING_SECS: i64 = 60;
const MAX_WARNINGS_PER_SESSION: u32 = 3;

/// Volatility score above which in-session warnings fire.
const WARNING_SCORE: f64 = 0.6;

/// A directional signal awaiting resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignal {
    pub key: String,
    pub session_id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub expiry_epoch: i64,
    pub confidence: f64,
    /// Feature snapshot from signal time, consumed by the ML update.
    pub features: Option<FeatureSnapshot>,
}

/// Bounded set remembering recently processed keys.
#[derive(Default)]
struct ProcessedSet {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl ProcessedSet {
    /// Insert a key; returns `false` when it was already present.
    fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
        while self.order.len() > PROCESSED_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        true
    }
}

/// Per-session warning pacing state.
#[derive(Debug, Clone, Copy, Default)]
struct WarningState {
    count: u32,
    last_epoch: i64,
}

pub struct WinLossTracker {
    pending: RwLock<HashMap<String, PendingSignal>>,
    processed: RwLock<ProcessedSet>,
    warnings: RwLock<HashMap<String, WarningState>>,
    /// Active sessions mirrored from the bus: id → (chat, symbol).
    active_sessions: RwLock<HashMap<String, (i64, String)>>,
    price_cache: Arc<PriceCache>,
    volatility_cache: Arc<VolatilityCache>,
    ml: Arc<RwLock<MlEnsemble>>,
    thresholds: Arc<RwLock<AdaptiveThresholds>>,
    bus: Arc<EventBus>,
}

impl WinLossTracker {
    pub fn new(
        price_cache: Arc<PriceCache>,
        volatility_cache: Arc<VolatilityCache>,
        ml: Arc<RwLock<MlEnsemble>>,
        thresholds: Arc<RwLock<AdaptiveThresholds>>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pending: RwLock::new(HashMap::new()),
            processed: RwLock::new(ProcessedSet::default()),
            warnings: RwLock::new(HashMap::new()),
            active_sessions: RwLock::new(HashMap::new()),
            price_cache,
            volatility_cache,
            ml,
            thresholds,
            bus,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    // ── Intake ──────────────────────────────────────────────────────────

    /// Track a published signal. Non-directional signals are ignored.
    pub fn track_signal(&self, event: &SignalEvent) {
        let signal = &event.signal;
        if !signal.direction.is_directional() {
            return;
        }
        let Some(entry_price) = signal.entry_price else {
            warn!(session_id = %signal.session_id, "directional signal without entry price — not tracked");
            return;
        };

        let key = format!("{}_{}", signal.session_id, signal.timestamp);
        let pending = PendingSignal {
            key: key.clone(),
            session_id: signal.session_id.clone(),
            chat_id: event.session.chat_id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price,
            expiry_epoch: signal.candle_close_time + signal.timeframe,
            confidence: signal.confidence,
            features: signal.features.clone(),
        };

        debug!(
            key = %key,
            symbol = %pending.symbol,
            direction = %pending.direction,
            expiry = pending.expiry_epoch,
            "signal pending resolution"
        );
        self.pending.write().insert(key, pending);
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Resolve every pending signal whose expiry has passed, ordered by
    /// expiry epoch ascending.
    pub fn poll(&self, now_epoch: i64) -> Vec<TradeResultEvent> {
        let mut due: Vec<PendingSignal> = {
            let mut pending = self.pending.write();
            let keys: Vec<String> = pending
                .values()
                .filter(|p| p.expiry_epoch <= now_epoch)
                .map(|p| p.key.clone())
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };
        due.sort_by_key(|p| p.expiry_epoch);

        let mut results = Vec::with_capacity(due.len());
        for signal in due {
            if !self.processed.write().insert(&signal.key) {
                debug!(key = %signal.key, "duplicate expiration rejected");
                continue;
            }

            let Some(exit) = self.price_cache.latest(&signal.symbol) else {
                warn!(
                    key = %signal.key,
                    symbol = %signal.symbol,
                    "no cached price at expiry — signal dropped without outcome"
                );
                continue;
            };

            let went_up = exit.price > signal.entry_price;
            let outcome = match signal.direction {
                Direction::Call if went_up => Outcome::Win,
                Direction::Put if exit.price < signal.entry_price => Outcome::Win,
                _ => Outcome::Loss,
            };

            // Model updates: the realized direction label, then the gates.
            if let Some(features) = &signal.features {
                self.ml.write().update(features, went_up);
            }
            self.thresholds.write().record_outcome(
                outcome == Outcome::Win,
                signal.confidence,
                now_epoch,
            );

            info!(
                key = %signal.key,
                symbol = %signal.symbol,
                direction = %signal.direction,
                outcome = %outcome,
                entry = signal.entry_price,
                exit = exit.price,
                "signal resolved"
            );

            let event = TradeResultEvent {
                session_id: signal.session_id.clone(),
                chat_id: signal.chat_id,
                symbol: signal.symbol.clone(),
                direction: signal.direction,
                outcome,
                entry_price: signal.entry_price,
                exit_price: exit.price,
                confidence: signal.confidence,
            };
            self.bus.publish_trade_result(event.clone());
            results.push(event);
        }
        results
    }

    // ── Volatility warnings ─────────────────────────────────────────────

    /// Push in-session warnings for symbols that turned hostile, respecting
    /// the per-session pacing and cap.
    pub fn volatility_recheck(&self, now_epoch: i64) {
        let sessions: Vec<(String, i64, String)> = self
            .active_sessions
            .read()
            .iter()
            .map(|(id, (chat, symbol))| (id.clone(), *chat, symbol.clone()))
            .collect();

        for (session_id, chat_id, symbol) in sessions {
            let Some(analysis) = self.volatility_cache.get(&symbol) else {
                continue;
            };
            if analysis.volatility_score <= WARNING_SCORE || analysis.is_stable() {
                continue;
            }

            {
                let mut warnings = self.warnings.write();
                let state = warnings.entry(session_id.clone()).or_default();
                if state.count >= MAX_WARNINGS_PER_SESSION
                    || now_epoch - state.last_epoch <= WARNING_SPACING_SECS
                {
                    continue;
                }
                state.count += 1;
                state.last_epoch = now_epoch;
            }

            self.bus.publish_warning(VolatilityWarningEvent {
                session_id,
                chat_id,
                symbol,
                kind: WarningKind::InSession,
            });
        }
    }

    // ── Event loops ─────────────────────────────────────────────────────

    /// Mirror session lifecycle and intake published signals.
    pub async fn run_intake(self: Arc<Self>) {
        let mut signals = self.bus.subscribe_signals();
        let mut sessions = self.bus.subscribe_sessions();
        loop {
            tokio::select! {
                event = signals.recv() => match event {
                    Ok(event) => self.track_signal(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "tracker intake lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
                event = sessions.recv() => match event {
                    Ok(SessionEvent::Started(session)) => {
                        self.active_sessions.write().insert(
                            session.id.clone(),
                            (session.chat_id, session.symbol.clone()),
                        );
                    }
                    Ok(SessionEvent::Stopped(session)) => {
                        self.active_sessions.write().remove(&session.id);
                        self.warnings.write().remove(&session.id);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "tracker session mirror lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    /// The 1 s expiry-resolution loop.
    pub async fn run_poll_loop(self: Arc<Self>) {
        info!(interval_secs = POLL_INTERVAL_SECS, "win/loss poll loop started");
        let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            self.poll(chrono::Utc::now().timestamp());
        }
    }

    /// The 5 s volatility re-check loop.
    pub async fn run_volatility_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(VOLATILITY_RECHECK_SECS));
        loop {
            ticker.tick().await;
            self.volatility_recheck(chrono::Utc::now().timestamp());
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionStats, SessionStatus};
    use crate::signal::{SignalOptions, SignalResult};

    fn make_tracker() -> (Arc<WinLossTracker>, Arc<PriceCache>, Arc<EventBus>) {
        let price_cache = Arc::new(PriceCache::new());
        let bus = Arc::new(EventBus::new());
        let tracker = WinLossTracker::new(
            price_cache.clone(),
            Arc::new(VolatilityCache::new()),
            Arc::new(RwLock::new(MlEnsemble::new())),
            Arc::new(RwLock::new(AdaptiveThresholds::new())),
            bus.clone(),
        );
        (tracker, price_cache, bus)
    }

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            chat_id: 7,
            symbol: "frxEURUSD".into(),
            timeframe: 60,
            status: SessionStatus::Active,
            started_at: 0,
            last_signal_at: None,
            preferences: SignalOptions::default(),
            stats: SessionStats::default(),
            last_signal_candle: None,
        }
    }

    fn call_signal(session_id: &str, entry: f64, close_time: i64) -> SignalEvent {
        let mut signal = SignalResult::no_trade(
            session_id,
            "frxEURUSD",
            60,
            close_time + 1,
            close_time,
            120,
        );
        signal.direction = Direction::Call;
        signal.confidence = 80.0;
        signal.entry_price = Some(entry);
        SignalEvent {
            session: session(session_id),
            signal,
        }
    }

    #[test]
    fn call_resolution_win_and_stats_event() {
        let (tracker, prices, bus) = make_tracker();
        let mut results_rx = bus.subscribe_trade_results();

        // Entry 1.2500 at close time T=6000, timeframe 60 => expiry 6060.
        tracker.track_signal(&call_signal("s1", 1.25, 6000));
        assert_eq!(tracker.pending_count(), 1);

        // Before expiry nothing resolves.
        assert!(tracker.poll(6059).is_empty());

        prices.update("frxEURUSD", 1.2510, 6060);
        let results = tracker.poll(6060);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.outcome, Outcome::Win);
        assert_eq!(r.entry_price, 1.25);
        assert_eq!(r.exit_price, 1.2510);
        assert_eq!(tracker.pending_count(), 0);

        // Published exactly once on the bus.
        assert!(results_rx.try_recv().is_ok());
        assert!(results_rx.try_recv().is_err());
    }

    #[test]
    fn put_wins_on_decline_and_ties_lose() {
        let (tracker, prices, _bus) = make_tracker();

        let mut put_event = call_signal("s1", 1.25, 6000);
        put_event.signal.direction = Direction::Put;
        tracker.track_signal(&put_event);
        prices.update("frxEURUSD", 1.2490, 6060);
        let results = tracker.poll(6060);
        assert_eq!(results[0].outcome, Outcome::Win);

        // Tie: exit == entry loses for a CALL.
        let mut tie_event = call_signal("s2", 1.2490, 6060);
        tie_event.signal.timestamp = 6200;
        tracker.track_signal(&tie_event);
        let results = tracker.poll(6200);
        assert_eq!(results[0].outcome, Outcome::Loss);
    }

    #[test]
    fn missing_price_skips_without_requeue() {
        let (tracker, _prices, _bus) = make_tracker();
        tracker.track_signal(&call_signal("s1", 1.25, 6000));
        let results = tracker.poll(7000);
        assert!(results.is_empty());
        // Dropped for good — not re-enqueued.
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn duplicate_keys_resolve_once() {
        let (tracker, prices, _bus) = make_tracker();
        prices.update("frxEURUSD", 1.26, 6060);

        let event = call_signal("s1", 1.25, 6000);
        tracker.track_signal(&event);
        assert_eq!(tracker.poll(6060).len(), 1);

        // The same signal tracked again resolves to the same key, which the
        // processed set rejects.
        tracker.track_signal(&event);
        assert!(tracker.poll(6060).is_empty());
    }

    #[test]
    fn non_directional_signals_not_tracked() {
        let (tracker, _prices, _bus) = make_tracker();
        let mut event = call_signal("s1", 1.25, 6000);
        event.signal.direction = Direction::NoTrade;
        tracker.track_signal(&event);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn resolution_ordered_by_expiry() {
        let (tracker, prices, _bus) = make_tracker();
        prices.update("frxEURUSD", 1.26, 10_000);

        let mut late = call_signal("s1", 1.25, 6060);
        late.signal.timestamp = 6061;
        let mut early = call_signal("s2", 1.25, 6000);
        early.signal.timestamp = 6001;
        tracker.track_signal(&late);
        tracker.track_signal(&early);

        let results = tracker.poll(10_000);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].session_id, "s2");
        assert_eq!(results[1].session_id, "s1");
    }

    #[test]
    fn warning_pacing_and_cap() {
        let (tracker, _prices, bus) = make_tracker();
        let mut warnings_rx = bus.subscribe_warnings();

        tracker
            .active_sessions
            .write()
            .insert("s1".into(), (7, "R_100".into()));

        // Hostile volatility snapshot in the cache.
        let analysis = crate::volatility::VolatilityAnalysis {
            symbol: "R_100".into(),
            wick_ratio: 0.8,
            atr_ratio: 0.02,
            range_ratio: 0.02,
            large_wick_count: 6,
            spike_count: 4,
            price_stability: 0.1,
            volatility_score: 0.9,
            is_volatile: true,
        };
        tracker.volatility_cache.update(analysis);

        // First warning fires.
        tracker.volatility_recheck(1_000);
        assert!(warnings_rx.try_recv().is_ok());

        // Within 60 s: suppressed.
        tracker.volatility_recheck(1_030);
        assert!(warnings_rx.try_recv().is_err());

        // Properly spaced: second and third fire, fourth capped.
        tracker.volatility_recheck(1_100);
        tracker.volatility_recheck(1_200);
        tracker.volatility_recheck(1_300);
        let mut fired = 0;
        while warnings_rx.try_recv().is_ok() {
            fired += 1;
        }
        assert_eq!(fired, 2, "cap at {MAX_WARNINGS_PER_SESSION} total warnings");
    }
}
