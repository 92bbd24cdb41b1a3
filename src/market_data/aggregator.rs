// =============================================================================
// CandleAggregator — streaming tick → OHLC aggregation
// =============================================================================
//
// One aggregator instance owns every (symbol, timeframe) series in the
// process. Per key it maintains a bounded ring of closed candles plus one
// forming candle, and publishes three event channels:
//
//   forming — first tick of a new interval opened a candle
//   tick    — a further tick was folded into the forming candle
//   closed  — the forming candle was frozen at a boundary crossing
//
// `closed` fires exactly once per boundary. Ticks must arrive in monotone
// epoch order per key; anything earlier than the current interval is dropped.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{Candle, CandleKey, Tick};

/// Event payload shared by all three aggregator channels.
#[derive(Debug, Clone)]
pub struct CandleEvent {
    pub key: CandleKey,
    pub candle: Candle,
}

/// Per-series state: the closed ring and the candle under construction.
struct SeriesState {
    closed: VecDeque<Candle>,
    forming: Option<Candle>,
    capacity: usize,
}

impl SeriesState {
    fn new(capacity: usize) -> Self {
        Self {
            closed: VecDeque::with_capacity(capacity + 1),
            forming: None,
            capacity,
        }
    }
}

/// Capacity of each event channel. Slow subscribers lag rather than block
/// the ingest path.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct CandleAggregator {
    series: RwLock<HashMap<CandleKey, SeriesState>>,
    forming_tx: broadcast::Sender<CandleEvent>,
    tick_tx: broadcast::Sender<CandleEvent>,
    closed_tx: broadcast::Sender<CandleEvent>,
}

impl CandleAggregator {
    pub fn new() -> Self {
        let (forming_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (tick_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (closed_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            series: RwLock::new(HashMap::new()),
            forming_tx,
            tick_tx,
            closed_tx,
        }
    }

    // ── Event subscriptions ─────────────────────────────────────────────

    pub fn subscribe_forming(&self) -> broadcast::Receiver<CandleEvent> {
        self.forming_tx.subscribe()
    }

    pub fn subscribe_tick(&self) -> broadcast::Receiver<CandleEvent> {
        self.tick_tx.subscribe()
    }

    pub fn subscribe_closed(&self) -> broadcast::Receiver<CandleEvent> {
        self.closed_tx.subscribe()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Seed (or re-seed, after a feed reconnect) a series with historical
    /// closed candles. Forming candles in `history` are discarded, the rest
    /// is sorted ascending and truncated to the newest `capacity` entries.
    pub fn initialize(
        &self,
        symbol: &str,
        timeframe: i64,
        history: Vec<Candle>,
        capacity: usize,
    ) {
        let key = CandleKey::new(symbol, timeframe);

        let mut sorted: Vec<Candle> = history
            .into_iter()
            .filter(|c| !c.is_forming)
            .collect();
        sorted.sort_by_key(|c| c.start_epoch);

        let skip = sorted.len().saturating_sub(capacity);
        let mut state = SeriesState::new(capacity);
        state.closed.extend(sorted.into_iter().skip(skip));

        debug!(key = %key, candles = state.closed.len(), "series initialized");
        self.series.write().insert(key, state);
    }

    /// Drop all state for a series. Safe to call for unknown keys.
    pub fn cleanup(&self, symbol: &str, timeframe: i64) {
        let key = CandleKey::new(symbol, timeframe);
        if self.series.write().remove(&key).is_some() {
            debug!(key = %key, "series released");
        }
    }

    /// Whether a series has been initialized for this key.
    pub fn has_series(&self, key: &CandleKey) -> bool {
        self.series.read().contains_key(key)
    }

    // ── Ingest ──────────────────────────────────────────────────────────

    /// Fold one tick into the (tick.symbol, timeframe) series.
    ///
    /// Ticks must be fed in non-decreasing epoch order per key; a tick whose
    /// interval is earlier than the current forming interval is dropped.
    /// Calling this for a key that was never initialized logs and ignores
    /// the tick — series are created explicitly, never on the ingest path.
    pub fn process_tick(&self, tick: &Tick, timeframe: i64) {
        if !tick.is_valid() {
            debug!(symbol = %tick.symbol, price = tick.price, "invalid tick dropped");
            return;
        }
        if timeframe <= 0 {
            warn!(timeframe, "non-positive timeframe — tick ignored");
            return;
        }

        let key = CandleKey::new(&tick.symbol, timeframe);
        let boundary = tick.epoch - tick.epoch.rem_euclid(timeframe);

        // Events are collected under the lock and published after it is
        // released so a slow channel never extends the critical section.
        let mut events: Vec<(Channel, Candle)> = Vec::with_capacity(2);

        {
            let mut map = self.series.write();
            let state = match map.get_mut(&key) {
                Some(s) => s,
                None => {
                    warn!(key = %key, "tick for unknown series dropped");
                    return;
                }
            };

            match state.forming.as_ref().map(|f| f.start_epoch) {
                None => {
                    let candle = Candle::from_tick(tick, timeframe, boundary);
                    events.push((Channel::Forming, candle.clone()));
                    state.forming = Some(candle);
                }
                Some(start) if boundary == start => {
                    if let Some(forming) = state.forming.as_mut() {
                        forming.apply_tick(tick.price);
                        events.push((Channel::Tick, forming.clone()));
                    }
                }
                Some(start) if boundary > start => {
                    // Boundary crossed: freeze the previous interval.
                    if let Some(mut closed) = state.forming.take() {
                        closed.is_forming = false;
                        events.push((Channel::Closed, closed.clone()));
                        state.closed.push_back(closed);
                        while state.closed.len() > state.capacity {
                            state.closed.pop_front();
                        }
                    }

                    let candle = Candle::from_tick(tick, timeframe, boundary);
                    events.push((Channel::Forming, candle.clone()));
                    state.forming = Some(candle);
                }
                Some(start) => {
                    debug!(
                        key = %key,
                        tick_epoch = tick.epoch,
                        forming_start = start,
                        "out-of-order tick dropped"
                    );
                }
            }
        }

        for (channel, candle) in events {
            let event = CandleEvent {
                key: key.clone(),
                candle,
            };
            // A send error only means nobody is listening.
            let _ = match channel {
                Channel::Forming => self.forming_tx.send(event),
                Channel::Tick => self.tick_tx.send(event),
                Channel::Closed => self.closed_tx.send(event),
            };
        }
    }

    // ── Snapshot reads ──────────────────────────────────────────────────

    /// All closed candles for a key, oldest first.
    pub fn get_closed(&self, key: &CandleKey) -> Vec<Candle> {
        self.series
            .read()
            .get(key)
            .map(|s| s.closed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The candle currently under construction, if any.
    pub fn get_forming(&self, key: &CandleKey) -> Option<Candle> {
        self.series.read().get(key).and_then(|s| s.forming.clone())
    }

    /// The newest `n` closed candles, oldest first.
    pub fn get_last_n(&self, key: &CandleKey, n: usize) -> Vec<Candle> {
        self.series
            .read()
            .get(key)
            .map(|s| {
                let start = s.closed.len().saturating_sub(n);
                s.closed.iter().skip(start).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Number of closed candles currently held for a key.
    pub fn closed_count(&self, key: &CandleKey) -> usize {
        self.series.read().get(key).map_or(0, |s| s.closed.len())
    }
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

enum Channel {
    Forming,
    Tick,
    Closed,
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const TF: i64 = 60;

    fn tick(price: f64, epoch: i64) -> Tick {
        Tick {
            symbol: "R_100".into(),
            price,
            epoch,
        }
    }

    fn aggregator() -> (CandleAggregator, CandleKey) {
        let agg = CandleAggregator::new();
        agg.initialize("R_100", TF, Vec::new(), 100);
        (agg, CandleKey::new("R_100", TF))
    }

    fn closed_candle(start_epoch: i64, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: TF,
            open: close,
            high: close,
            low: close,
            close,
            start_epoch,
            tick_count: 1,
            is_forming: false,
        }
    }

    #[test]
    fn clean_aggregation_scenario() {
        // Ticks at 1000/1030/1059 belong to [960, 1020); 1060 crosses into
        // [1020, 1080) and freezes the first interval.
        let (agg, key) = aggregator();
        let mut closed_rx = agg.subscribe_closed();

        agg.process_tick(&tick(99.0, 1000), TF);
        agg.process_tick(&tick(100.5, 1030), TF);
        agg.process_tick(&tick(98.7, 1059), TF);
        agg.process_tick(&tick(101.0, 1060), TF);

        let closed = agg.get_closed(&key);
        assert_eq!(closed.len(), 1);
        let c = &closed[0];
        assert_eq!(c.start_epoch, 960);
        assert_eq!(c.open, 99.0);
        assert_eq!(c.high, 100.5);
        assert_eq!(c.low, 98.7);
        assert_eq!(c.close, 98.7);
        assert_eq!(c.tick_count, 3);
        assert!(!c.is_forming);

        let forming = agg.get_forming(&key).unwrap();
        assert_eq!(forming.start_epoch, 1020);
        assert_eq!(forming.open, 101.0);
        assert_eq!(forming.tick_count, 1);

        // Exactly one closed event was published.
        let event = closed_rx.try_recv().unwrap();
        assert_eq!(event.candle.start_epoch, 960);
        assert!(closed_rx.try_recv().is_err());
    }

    #[test]
    fn boundary_tick_opens_new_interval() {
        // epoch 1080 is itself a boundary and must start a fresh candle.
        let (agg, key) = aggregator();
        agg.process_tick(&tick(10.0, 1020), TF);
        agg.process_tick(&tick(11.0, 1080), TF);

        let forming = agg.get_forming(&key).unwrap();
        assert_eq!(forming.start_epoch, 1080);
        assert_eq!(agg.get_closed(&key).len(), 1);
    }

    #[test]
    fn out_of_order_tick_dropped() {
        let (agg, key) = aggregator();
        agg.process_tick(&tick(10.0, 1020), TF);
        agg.process_tick(&tick(11.0, 1080), TF);

        // Earlier interval after crossing — must not reopen anything.
        agg.process_tick(&tick(99.0, 1025), TF);

        let closed = agg.get_closed(&key);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close, 10.0);
        let forming = agg.get_forming(&key).unwrap();
        assert_eq!(forming.close, 11.0);
        assert_eq!(forming.tick_count, 1);
    }

    #[test]
    fn invalid_ticks_leave_state_unchanged() {
        let (agg, key) = aggregator();
        agg.process_tick(&tick(10.0, 1000), TF);

        agg.process_tick(&tick(0.0, 1001), TF);
        agg.process_tick(&tick(-5.0, 1002), TF);
        agg.process_tick(&tick(f64::NAN, 1003), TF);

        let forming = agg.get_forming(&key).unwrap();
        assert_eq!(forming.tick_count, 1);
        assert_eq!(forming.close, 10.0);
    }

    #[test]
    fn unknown_key_is_not_created_implicitly() {
        let agg = CandleAggregator::new();
        let key = CandleKey::new("R_50", TF);
        agg.process_tick(
            &Tick {
                symbol: "R_50".into(),
                price: 10.0,
                epoch: 1000,
            },
            TF,
        );
        assert!(!agg.has_series(&key));
        assert!(agg.get_forming(&key).is_none());
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let agg = CandleAggregator::new();
        agg.initialize("R_100", TF, Vec::new(), 3);
        let key = CandleKey::new("R_100", TF);

        // 5 boundary crossings.
        for i in 0..6 {
            agg.process_tick(&tick(100.0 + i as f64, i * TF), TF);
        }

        let closed = agg.get_closed(&key);
        assert_eq!(closed.len(), 3);
        assert_eq!(closed[0].start_epoch, 2 * TF);
        assert_eq!(closed[2].start_epoch, 4 * TF);
    }

    #[test]
    fn initialize_sorts_filters_and_truncates_history() {
        let agg = CandleAggregator::new();
        let mut history = vec![
            closed_candle(180, 3.0),
            closed_candle(60, 1.0),
            closed_candle(120, 2.0),
        ];
        let mut still_forming = closed_candle(240, 4.0);
        still_forming.is_forming = true;
        history.push(still_forming);

        agg.initialize("R_100", TF, history, 2);
        let key = CandleKey::new("R_100", TF);

        let closed = agg.get_closed(&key);
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].start_epoch, 120);
        assert_eq!(closed[1].start_epoch, 180);
    }

    #[test]
    fn get_last_n_returns_newest_oldest_first() {
        let (agg, key) = aggregator();
        for i in 0..5 {
            agg.process_tick(&tick(100.0 + i as f64, i * TF), TF);
        }
        let last2 = agg.get_last_n(&key, 2);
        assert_eq!(last2.len(), 2);
        assert!(last2[0].start_epoch < last2[1].start_epoch);
        assert_eq!(last2[1].close, 103.0);
    }

    #[test]
    fn cleanup_releases_series() {
        let (agg, key) = aggregator();
        agg.process_tick(&tick(10.0, 0), TF);
        agg.cleanup("R_100", TF);
        assert!(!agg.has_series(&key));
    }

    #[test]
    fn replay_reproduces_identical_closed_candles() {
        // Same tick stream through two aggregators gives byte-identical OHLC.
        let stream: Vec<Tick> = (0..200)
            .map(|i| tick(100.0 + ((i * 37) % 11) as f64 * 0.1, 1000 + i * 7))
            .collect();

        let run = |_label: &str| {
            let (agg, key) = aggregator();
            for t in &stream {
                agg.process_tick(t, TF);
            }
            agg.get_closed(&key)
        };

        let a = run("a");
        let b = run("b");
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.start_epoch, y.start_epoch);
            assert_eq!(x.open, y.open);
            assert_eq!(x.high, y.high);
            assert_eq!(x.low, y.low);
            assert_eq!(x.close, y.close);
            assert_eq!(x.tick_count, y.tick_count);
        }
    }
}
