// =============================================================================
// Bollinger Bands & Keltner Channel
// =============================================================================
//
// Bollinger: SMA(period) ± stddev_mult * population stddev over the window.
// Keltner:   EMA(period) ± atr_mult * ATR(period).
//
// Standard parameters: Bollinger (20, 2.0), Keltner (EMA20, 2 * ATR20).
// The squeeze strategy compares the two: Bollinger inside Keltner means
// volatility compression.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::atr::calculate_atr;
use super::ema::{calculate_ema, calculate_sma};
use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSet {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BandSet {
    /// Band width normalized by the middle band.
    pub fn width(&self) -> f64 {
        if self.middle == 0.0 {
            0.0
        } else {
            (self.upper - self.lower) / self.middle
        }
    }
}

/// Bollinger bands over the last `period` closes.
pub fn calculate_bollinger(closes: &[f64], period: usize, stddev_mult: f64) -> Option<BandSet> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let middle = *calculate_sma(closes, period).last()?;
    let window = &closes[closes.len() - period..];
    let variance =
        window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();
    if !stddev.is_finite() {
        return None;
    }

    Some(BandSet {
        upper: middle + stddev_mult * stddev,
        middle,
        lower: middle - stddev_mult * stddev,
    })
}

/// Keltner channel: EMA(period) ± atr_mult * ATR(period).
pub fn calculate_keltner(candles: &[Candle], period: usize, atr_mult: f64) -> Option<BandSet> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = *calculate_ema(&closes, period).last()?;
    let atr = calculate_atr(candles, period)?;
    Some(BandSet {
        upper: middle + atr_mult * atr,
        middle,
        lower: middle - atr_mult * atr,
    })
}

/// Bollinger fully inside Keltner — the squeeze precondition.
pub fn is_squeeze(candles: &[Candle]) -> Option<bool> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let bb = calculate_bollinger(&closes, 20, 2.0)?;
    let kc = calculate_keltner(candles, 20, 2.0)?;
    Some(bb.upper < kc.upper && bb.lower > kc.lower)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, spread: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: close,
            high: close + spread,
            low: close - spread,
            close,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0; 10], 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_series_collapses() {
        let bands = calculate_bollinger(&[100.0; 30], 20, 2.0).unwrap();
        assert!((bands.upper - 100.0).abs() < 1e-10);
        assert!((bands.lower - 100.0).abs() < 1e-10);
        assert_eq!(bands.width(), 0.0);
    }

    #[test]
    fn bollinger_symmetry_around_sma() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 4.0)
            .collect();
        let bands = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(
            ((bands.upper - bands.middle) - (bands.middle - bands.lower)).abs() < 1e-10
        );
    }

    #[test]
    fn bollinger_wider_on_volatile_series() {
        let calm: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 0.1).collect();
        let wild: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 5.0).collect();
        let calm_w = calculate_bollinger(&calm, 20, 2.0).unwrap().width();
        let wild_w = calculate_bollinger(&wild, 20, 2.0).unwrap().width();
        assert!(wild_w > calm_w);
    }

    #[test]
    fn keltner_brackets_ema() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(100.0 + (i as f64 * 0.4).sin() * 2.0, 1.0))
            .collect();
        let kc = calculate_keltner(&candles, 20, 2.0).unwrap();
        assert!(kc.lower < kc.middle && kc.middle < kc.upper);
    }

    #[test]
    fn squeeze_detected_when_bands_compress() {
        // Tiny close-to-close variance with a wide true range: Bollinger
        // collapses while Keltner stays wide open.
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(100.0 + (i % 2) as f64 * 0.01, 2.0))
            .collect();
        assert_eq!(is_squeeze(&candles), Some(true));
    }

    #[test]
    fn no_squeeze_on_expansion() {
        // Large close swings with minimal wicks: Bollinger outruns Keltner.
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(100.0 + if i % 2 == 0 { 8.0 } else { -8.0 }, 0.1))
            .collect();
        assert_eq!(is_squeeze(&candles), Some(false));
    }
}
