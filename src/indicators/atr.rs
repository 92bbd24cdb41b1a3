// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the smoothed average of TR:
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Default period: 14. ATR bands wrap an SMA of closes at ±2·ATR.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::ema::calculate_sma;
use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// True-range series, one value per candle starting at index 1.
fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let hl = w[1].high - w[1].low;
            let hc = (w[1].high - w[0].close).abs();
            let lc = (w[1].low - w[0].close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Most recent ATR value via Wilder's smoothing.
///
/// `None` when `period` is zero, history is shorter than `period + 1`, or any
/// intermediate value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let tr = true_ranges(candles);

    let seed: f64 = tr[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let period_f = period as f64;
    let mut atr = seed;
    for &v in &tr[period..] {
        atr = (atr * (period_f - 1.0) + v) / period_f;
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

/// ATR as a fraction of the latest close. Used by the volatility scorer.
pub fn atr_ratio(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close <= 0.0 {
        return None;
    }
    Some(atr / last_close)
}

/// SMA(period) ± 2·ATR(period) bands around price.
pub fn atr_bands(candles: &[Candle], period: usize) -> Option<AtrBands> {
    let atr = calculate_atr(candles, period)?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = *calculate_sma(&closes, period).last()?;
    Some(AtrBands {
        upper: middle + 2.0 * atr,
        middle,
        lower: middle - 2.0 * atr,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open,
            high,
            low,
            close,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    #[test]
    fn atr_period_zero() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&candles, 0).is_none());
    }

    #[test]
    fn atr_insufficient_data() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&candles, 14).is_none());
    }

    #[test]
    fn atr_constant_range_converges() {
        let mut candles = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64 * 0.1;
            candles.push(candle(base, base + 5.0, base - 5.0, base));
        }
        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn atr_true_range_uses_prev_close() {
        // Gap up: |115 - 95| = 20 dominates the 7-point bar range.
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0),
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = calculate_atr(&candles, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn atr_nan_returns_none() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, f64::NAN, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
        ];
        assert!(calculate_atr(&candles, 3).is_none());
    }

    #[test]
    fn ratio_is_atr_over_close() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 3.0, base - 3.0, base + 1.0)
            })
            .collect();
        let atr = calculate_atr(&candles, 14).unwrap();
        let ratio = atr_ratio(&candles, 14).unwrap();
        let close = candles.last().unwrap().close;
        assert!((ratio - atr / close).abs() < 1e-12);
    }

    #[test]
    fn bands_bracket_the_sma() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 3.0;
                candle(base, base + 2.0, base - 2.0, base)
            })
            .collect();
        let bands = atr_bands(&candles, 14).unwrap();
        assert!(bands.lower < bands.middle);
        assert!(bands.middle < bands.upper);
        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((bands.upper - bands.middle - 2.0 * atr).abs() < 1e-10);
    }
}
