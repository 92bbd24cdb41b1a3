// =============================================================================
// Stochastic Oscillator — %K / %D
// =============================================================================
//
//   %K = 100 * (close - lowest_low(k)) / (highest_high(k) - lowest_low(k))
//   %D = SMA(%K, d)
//
// Standard parameters: k_period 14, d_period 3.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochValue {
    pub k: f64,
    pub d: f64,
}

/// Full %K series. A flat window (high == low) yields a neutral 50.
pub fn stochastic_k_series(candles: &[Candle], k_period: usize) -> Vec<f64> {
    if k_period == 0 || candles.len() < k_period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(candles.len() - k_period + 1);
    for window in candles.windows(k_period) {
        let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let close = window[k_period - 1].close;

        let range = high - low;
        let k = if range <= 0.0 {
            50.0
        } else {
            100.0 * (close - low) / range
        };
        if !k.is_finite() {
            break;
        }
        result.push(k);
    }
    result
}

/// Latest smoothed stochastic (%K with its %D SMA).
pub fn current_stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Option<StochValue> {
    stochastic_with_previous(candles, k_period, d_period).map(|(last, _)| last)
}

/// Latest and previous stochastic values, for cross detection.
pub fn stochastic_with_previous(
    candles: &[Candle],
    k_period: usize,
    d_period: usize,
) -> Option<(StochValue, StochValue)> {
    if d_period == 0 {
        return None;
    }
    let k_series = stochastic_k_series(candles, k_period);
    if k_series.len() < d_period + 1 {
        return None;
    }

    let d_at = |end: usize| -> f64 {
        k_series[end - d_period..end].iter().sum::<f64>() / d_period as f64
    };

    let n = k_series.len();
    let last = StochValue {
        k: k_series[n - 1],
        d: d_at(n),
    };
    let prev = StochValue {
        k: k_series[n - 2],
        d: d_at(n - 1),
    };
    Some((last, prev))
}
