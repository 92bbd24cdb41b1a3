// =============================================================================
// Event Bus — typed fan-out channels between the core components
// =============================================================================
//
// The session manager and the win/loss tracker both need each other's
// events; neither holds a reference to the other. Every channel is a tokio
// broadcast channel: publishers never block, slow subscribers lag.
// =============================================================================

use tokio::sync::broadcast;

use crate::session::Session;
use crate::signal::SignalResult;
use crate::types::{Direction, Outcome};

/// Capacity shared by all bus channels.
const CHANNEL_CAPACITY: usize = 256;

/// A signal produced at a candle close for one session.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub session: Session,
    pub signal: SignalResult,
}

/// A resolved pending signal.
#[derive(Debug, Clone)]
pub struct TradeResultEvent {
    pub session_id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Confidence the signal carried when it was emitted.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    PreSession,
    InSession,
}

/// Volatility warning pushed to a session's chat.
#[derive(Debug, Clone)]
pub struct VolatilityWarningEvent {
    pub session_id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub kind: WarningKind,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started(Session),
    Stopped(Session),
}

pub struct EventBus {
    signal_tx: broadcast::Sender<SignalEvent>,
    result_tx: broadcast::Sender<TradeResultEvent>,
    warning_tx: broadcast::Sender<VolatilityWarningEvent>,
    session_tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (signal_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (result_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (warning_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (session_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            signal_tx,
            result_tx,
            warning_tx,
            session_tx,
        }
    }

    // Publishers. A send error only means nobody is subscribed.

    pub fn publish_signal(&self, event: SignalEvent) {
        let _ = self.signal_tx.send(event);
    }

    pub fn publish_trade_result(&self, event: TradeResultEvent) {
        let _ = self.result_tx.send(event);
    }

    pub fn publish_warning(&self, event: VolatilityWarningEvent) {
        let _ = self.warning_tx.send(event);
    }

    pub fn publish_session(&self, event: SessionEvent) {
        let _ = self.session_tx.send(event);
    }

    // Subscriptions.

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SignalEvent> {
        self.signal_tx.subscribe()
    }

    pub fn subscribe_trade_results(&self) -> broadcast::Receiver<TradeResultEvent> {
        self.result_tx.subscribe()
    }

    pub fn subscribe_warnings(&self) -> broadcast::Receiver<VolatilityWarningEvent> {
        self.warning_tx.subscribe()
    }

    pub fn subscribe_sessions(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish_trade_result(TradeResultEvent {
            session_id: "s1".into(),
            chat_id: 1,
            symbol: "R_100".into(),
            direction: Direction::Call,
            outcome: Outcome::Win,
            entry_price: 1.25,
            exit_price: 1.26,
            confidence: 80.0,
        });
    }

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_trade_results();
        bus.publish_trade_result(TradeResultEvent {
            session_id: "s1".into(),
            chat_id: 1,
            symbol: "R_100".into(),
            direction: Direction::Put,
            outcome: Outcome::Loss,
            entry_price: 1.25,
            exit_price: 1.26,
            confidence: 75.0,
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.outcome, Outcome::Loss);
        assert_eq!(event.direction, Direction::Put);
    }
}
