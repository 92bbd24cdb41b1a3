// =============================================================================
// SuperTrend — ATR trailing band with direction state
// =============================================================================
//
//   basis      = (H + L) / 2
//   upper_band = basis + multiplier * ATR(period)
//   lower_band = basis - multiplier * ATR(period)
//
// The line trails below price in an uptrend (lower band) and above price in a
// downtrend (upper band); it flips when the close crosses the active band.
// Standard parameters: period 10, multiplier 3.0.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::atr::calculate_atr;
use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendValue {
    /// The trailing stop line.
    pub value: f64,
    pub direction: TrendDirection,
}

/// Latest SuperTrend value and direction.
///
/// Needs `period + 1` candles for the ATR seed plus enough bars to walk the
/// band state forward; `None` below that.
pub fn calculate_supertrend(
    candles: &[Candle],
    period: usize,
    multiplier: f64,
) -> Option<SuperTrendValue> {
    if period == 0 || candles.len() < period + 2 {
        return None;
    }

    let mut direction = TrendDirection::Up;
    let mut line = 0.0_f64;
    let mut initialized = false;

    // Walk forward from the first index where ATR exists.
    for end in (period + 1)..=candles.len() {
        let window = &candles[..end];
        let atr = calculate_atr(window, period)?;
        let current = &window[end - 1];

        let basis = (current.high + current.low) / 2.0;
        let upper = basis + multiplier * atr;
        let lower = basis - multiplier * atr;

        if !initialized {
            direction = if current.close >= basis {
                TrendDirection::Up
            } else {
                TrendDirection::Down
            };
            line = match direction {
                TrendDirection::Up => lower,
                TrendDirection::Down => upper,
            };
            initialized = true;
            continue;
        }

        match direction {
            TrendDirection::Up => {
                if current.close < line {
                    direction = TrendDirection::Down;
                    line = upper;
                } else {
                    // Trailing stop only ratchets upward.
                    line = line.max(lower);
                }
            }
            TrendDirection::Down => {
                if current.close > line {
                    direction = TrendDirection::Up;
                    line = lower;
                } else {
                    line = line.min(upper);
                }
            }
        }
    }

    line.is_finite().then_some(SuperTrendValue {
        value: line,
        direction,
    })
}
