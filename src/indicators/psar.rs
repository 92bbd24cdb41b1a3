// =============================================================================
// Parabolic SAR — stop-and-reverse trailing dots
// =============================================================================
//
//   SAR_t = SAR_{t-1} + AF * (EP - SAR_{t-1})
//
// AF starts at `step` (0.02), grows by `step` on every new extreme point (EP),
// and is capped at `max_af` (0.2). The SAR flips sides when price penetrates
// it; in an uptrend it is additionally clamped below the prior two lows
// (above the prior two highs in a downtrend).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PsarValue {
    pub value: f64,
    pub is_uptrend: bool,
}

/// Latest Parabolic SAR. Needs at least 5 candles to stabilize.
pub fn calculate_psar(candles: &[Candle], step: f64, max_af: f64) -> Option<PsarValue> {
    if candles.len() < 5 || step <= 0.0 || max_af < step {
        return None;
    }

    // Seed from the first two bars.
    let mut is_uptrend = candles[1].close >= candles[0].close;
    let mut sar = if is_uptrend {
        candles[0].low
    } else {
        candles[0].high
    };
    let mut ep = if is_uptrend {
        candles[1].high
    } else {
        candles[1].low
    };
    let mut af = step;

    for i in 2..candles.len() {
        let c = &candles[i];
        sar += af * (ep - sar);

        if is_uptrend {
            // SAR may not sit inside the prior two bars' range.
            sar = sar.min(candles[i - 1].low).min(candles[i - 2].low);
            if c.low < sar {
                // Reversal: flip below price.
                is_uptrend = false;
                sar = ep;
                ep = c.low;
                af = step;
            } else if c.high > ep {
                ep = c.high;
                af = (af + step).min(max_af);
            }
        } else {
            sar = sar.max(candles[i - 1].high).max(candles[i - 2].high);
            if c.high > sar {
                is_uptrend = true;
                sar = ep;
                ep = c.high;
                af = step;
            } else if c.low < ep {
                ep = c.low;
                af = (af + step).min(max_af);
            }
        }

        if !sar.is_finite() {
            return None;
        }
    }

    Some(PsarValue {
        value: sar,
        is_uptrend,
    })
}
