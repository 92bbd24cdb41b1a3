// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Classic OBV accumulates volume signed by the close-to-close direction. This
// feed carries no traded volume, so the candle's tick count stands in as the
// volume proxy — activity rather than notional.
//
//   OBV_t = OBV_{t-1} + tick_count  (close up)
//         = OBV_{t-1} - tick_count  (close down)
//         = OBV_{t-1}               (unchanged)
// =============================================================================

use crate::market_data::Candle;

/// Full OBV series, one value per candle starting at index 1.
pub fn obv_series(candles: &[Candle]) -> Vec<f64> {
    if candles.len() < 2 {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(candles.len() - 1);
    let mut obv = 0.0_f64;
    for w in candles.windows(2) {
        let volume = w[1].tick_count as f64;
        if w[1].close > w[0].close {
            obv += volume;
        } else if w[1].close < w[0].close {
            obv -= volume;
        }
        result.push(obv);
    }
    result
}

/// Latest OBV value together with the previous one, for slope votes.
pub fn obv_with_previous(candles: &[Candle]) -> Option<(f64, f64)> {
    let series = obv_series(candles);
    if series.len() < 2 {
        return None;
    }
    Some((series[series.len() - 1], series[series.len() - 2]))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, ticks: u64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            start_epoch: 0,
            tick_count: ticks,
            is_forming: false,
        }
    }

    #[test]
    fn obv_accumulates_signed_ticks() {
        let candles = vec![
            candle(100.0, 10),
            candle(101.0, 20), // +20
            candle(100.5, 5),  // -5 => 15
            candle(100.5, 7),  // unchanged => 15
            candle(102.0, 3),  // +3 => 18
        ];
        assert_eq!(obv_series(&candles), vec![20.0, 15.0, 15.0, 18.0]);
    }

    #[test]
    fn obv_empty_on_short_input() {
        assert!(obv_series(&[candle(100.0, 10)]).is_empty());
    }

    #[test]
    fn obv_with_previous_pairs_tail() {
        let candles = vec![
            candle(100.0, 10),
            candle(101.0, 20),
            candle(102.0, 30),
        ];
        let (last, prev) = obv_with_previous(&candles).unwrap();
        assert_eq!(prev, 20.0);
        assert_eq!(last, 50.0);
    }
}
