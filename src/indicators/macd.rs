// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   MACD line   = EMA(fast) - EMA(slow)
//   Signal line = EMA(MACD line, signal_period)
//   Histogram   = MACD line - Signal line
//
// Standard parameters: fast 12, slow 26, signal 9. The series needs at least
// `slow + signal` closes before the first histogram value exists.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Full MACD series, one value per close once enough history exists.
pub fn macd_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Vec<MacdValue> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return Vec::new();
    }
    if closes.len() < slow + signal_period {
        return Vec::new();
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if slow_ema.is_empty() {
        return Vec::new();
    }

    // Align both EMA series on the slow one's start.
    let offset = fast_ema.len() - slow_ema.len();
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, &s)| fast_ema[i + offset] - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);
    if signal_line.is_empty() {
        return Vec::new();
    }

    let macd_offset = macd_line.len() - signal_line.len();
    signal_line
        .iter()
        .enumerate()
        .map(|(i, &sig)| {
            let macd = macd_line[i + macd_offset];
            MacdValue {
                macd,
                signal: sig,
                histogram: macd - sig,
            }
        })
        .collect()
}

/// Latest MACD value with the standard (12, 26, 9) parameters.
pub fn current_macd(closes: &[f64]) -> Option<MacdValue> {
    macd_series(closes, 12, 26, 9).last().copied()
}

/// Latest and previous MACD values, for crossover detection.
pub fn macd_with_previous(closes: &[f64]) -> Option<(MacdValue, MacdValue)> {
    let series = macd_series(closes, 12, 26, 9);
    if series.len() < 2 {
        return None;
    }
    Some((series[series.len() - 1], series[series.len() - 2]))
}
