// =============================================================================
// Price Channels — Donchian channel and range percentile
// =============================================================================
//
// Donchian: highest high / lowest low over the window (period 20 default).
// Range percentile: where the latest close sits inside the window's
// high-low envelope, in [0, 1].
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
}

impl DonchianChannel {
    pub fn middle(&self) -> f64 {
        (self.upper + self.lower) / 2.0
    }
}

/// Donchian channel over the last `period` candles.
pub fn calculate_donchian(candles: &[Candle], period: usize) -> Option<DonchianChannel> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let upper = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    (upper.is_finite() && lower.is_finite()).then_some(DonchianChannel { upper, lower })
}

/// Position of the latest close inside the window envelope, in [0, 1].
/// A flat window reads 0.5.
pub fn range_percentile(candles: &[Candle], period: usize) -> Option<f64> {
    let channel = calculate_donchian(candles, period)?;
    let close = candles.last()?.close;
    let range = channel.upper - channel.lower;
    if range <= 0.0 {
        return Some(0.5);
    }
    Some(((close - channel.lower) / range).clamp(0.0, 1.0))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: (high + low) / 2.0,
            high,
            low,
            close,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    #[test]
    fn donchian_envelope() {
        let candles = vec![
            candle(105.0, 95.0, 100.0),
            candle(110.0, 98.0, 104.0),
            candle(108.0, 92.0, 96.0),
        ];
        let ch = calculate_donchian(&candles, 3).unwrap();
        assert_eq!(ch.upper, 110.0);
        assert_eq!(ch.lower, 92.0);
        assert_eq!(ch.middle(), 101.0);
    }

    #[test]
    fn donchian_window_excludes_older_candles() {
        let mut candles = vec![candle(200.0, 50.0, 100.0)];
        candles.extend(std::iter::repeat(candle(105.0, 95.0, 100.0)).take(20));
        let ch = calculate_donchian(&candles, 20).unwrap();
        assert_eq!(ch.upper, 105.0);
        assert_eq!(ch.lower, 95.0);
    }

    #[test]
    fn donchian_insufficient_data() {
        assert!(calculate_donchian(&[candle(1.0, 0.5, 0.8)], 20).is_none());
    }

    #[test]
    fn percentile_at_extremes() {
        let mut candles = vec![candle(110.0, 90.0, 100.0); 19];
        candles.push(candle(110.0, 90.0, 110.0));
        assert!((range_percentile(&candles, 20).unwrap() - 1.0).abs() < 1e-10);

        candles.last_mut().unwrap().close = 90.0;
        assert!(range_percentile(&candles, 20).unwrap().abs() < 1e-10);
    }

    #[test]
    fn percentile_flat_window_is_half() {
        let candles = vec![candle(100.0, 100.0, 100.0); 25];
        assert_eq!(range_percentile(&candles, 20), Some(0.5));
    }
}
