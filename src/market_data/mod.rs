// =============================================================================
// Market Data — ticks, candles and the streaming aggregator
// =============================================================================

pub mod aggregator;
pub mod price_cache;

pub use aggregator::{CandleAggregator, CandleEvent};
pub use price_cache::PriceCache;

use serde::{Deserialize, Serialize};

/// A single price observation from the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    /// Unix epoch in seconds.
    pub epoch: i64,
}

impl Tick {
    /// A tick is usable only when its price is a positive finite number.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Summary of price action over one fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Candle duration in seconds.
    pub timeframe: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Interval start — always an exact multiple of `timeframe`.
    pub start_epoch: i64,
    /// Number of ticks folded into this candle (volume proxy).
    pub tick_count: u64,
    pub is_forming: bool,
}

impl Candle {
    /// Open a new forming candle from the first tick of an interval.
    pub fn from_tick(tick: &Tick, timeframe: i64, start_epoch: i64) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timeframe,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            start_epoch,
            tick_count: 1,
            is_forming: true,
        }
    }

    /// Fold one more tick into a forming candle.
    pub fn apply_tick(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.tick_count += 1;
    }

    /// Candle body size (absolute open-to-close move).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full high-to-low range.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Midpoint of the high-low range, used by harmonic detection.
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    /// Timeframe in seconds.
    pub timeframe: i64,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: i64) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}s", self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, epoch: i64) -> Tick {
        Tick {
            symbol: "R_100".into(),
            price,
            epoch,
        }
    }

    #[test]
    fn tick_validity() {
        assert!(tick(1.0, 0).is_valid());
        assert!(!tick(0.0, 0).is_valid());
        assert!(!tick(-1.0, 0).is_valid());
        assert!(!tick(f64::NAN, 0).is_valid());
        assert!(!tick(f64::INFINITY, 0).is_valid());
    }

    #[test]
    fn candle_fold_keeps_ohlc_envelope() {
        let t = tick(100.0, 1000);
        let mut c = Candle::from_tick(&t, 60, 960);
        c.apply_tick(102.5);
        c.apply_tick(98.0);
        c.apply_tick(101.0);

        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 102.5);
        assert_eq!(c.low, 98.0);
        assert_eq!(c.close, 101.0);
        assert_eq!(c.tick_count, 4);
        assert!(c.low <= c.open.min(c.close));
        assert!(c.high >= c.open.max(c.close));
    }

    #[test]
    fn candle_anatomy() {
        let mut c = Candle::from_tick(&tick(10.0, 0), 60, 0);
        c.apply_tick(14.0);
        c.apply_tick(8.0);
        c.apply_tick(12.0);
        // open 10, high 14, low 8, close 12
        assert_eq!(c.body(), 2.0);
        assert_eq!(c.range(), 6.0);
        assert_eq!(c.upper_wick(), 2.0);
        assert_eq!(c.lower_wick(), 2.0);
        assert!(c.is_bullish());
        assert_eq!(c.midpoint(), 11.0);
    }

    #[test]
    fn key_display() {
        let key = CandleKey::new("frxEURUSD", 300);
        assert_eq!(key.to_string(), "frxEURUSD@300s");
    }
}
