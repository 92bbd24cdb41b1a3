// =============================================================================
// Fisher Transform
// =============================================================================
//
// Maps price position within its recent range onto a near-Gaussian scale so
// turning points show up as sharp extremes.
//
//   x_t = 0.33 * 2 * (mid_norm - 0.5) + 0.67 * x_{t-1},  clipped to |x| < 0.999
//   F_t = 0.5 * ln((1 + x) / (1 - x)) + 0.5 * F_{t-1}
//
// where mid_norm is the (H+L)/2 midpoint normalized into the rolling 10-bar
// min/max envelope.
// =============================================================================

use crate::market_data::Candle;

const NORM_WINDOW: usize = 10;
const CLIP: f64 = 0.999;

/// Fisher transform series over candle midpoints.
pub fn fisher_series(candles: &[Candle]) -> Vec<f64> {
    if candles.len() < NORM_WINDOW + 1 {
        return Vec::new();
    }

    let mids: Vec<f64> = candles.iter().map(|c| c.midpoint()).collect();

    let mut x = 0.0_f64;
    let mut fisher = 0.0_f64;
    let mut result = Vec::with_capacity(mids.len() - NORM_WINDOW);

    for i in NORM_WINDOW..mids.len() {
        let window = &mids[i + 1 - NORM_WINDOW..=i];
        let max = window.iter().fold(f64::MIN, |a, &b| a.max(b));
        let min = window.iter().fold(f64::MAX, |a, &b| a.min(b));
        let range = max - min;

        let norm = if range <= 0.0 {
            0.5
        } else {
            (mids[i] - min) / range
        };

        x = (0.66 * (norm - 0.5) + 0.67 * x).clamp(-CLIP, CLIP);
        fisher = 0.5 * ((1.0 + x) / (1.0 - x)).ln() + 0.5 * fisher;

        if !fisher.is_finite() {
            break;
        }
        result.push(fisher);
    }

    result
}

/// Latest and previous Fisher values, for cross/extreme votes.
pub fn fisher_with_previous(candles: &[Candle]) -> Option<(f64, f64)> {
    let series = fisher_series(candles);
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

    fn candle(high: f64, low: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    #[test]
    fn fisher_insufficient_data() {
        let candles = vec![candle(101.0, 99.0); 8];
        assert!(fisher_series(&candles).is_empty());
    }

    #[test]
    fn fisher_positive_at_range_top() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base + 1.0, base - 1.0)
            })
            .collect();
        let (last, _) = fisher_with_previous(&candles).unwrap();
        assert!(last > 0.0, "rising mids should read positive, got {last}");
    }

    #[test]
    fn fisher_negative_at_range_bottom() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 200.0 - i as f64;
                candle(base + 1.0, base - 1.0)
            })
            .collect();
        let (last, _) = fisher_with_previous(&candles).unwrap();
        assert!(last < 0.0);
    }

    #[test]
    fn fisher_flat_series_is_zero() {
        let candles = vec![candle(101.0, 99.0); 40];
        let series = fisher_series(&candles);
        for v in series {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn fisher_values_finite() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.9).sin() * 10.0;
                candle(base + 0.5, base - 0.5)
            })
            .collect();
        for v in fisher_series(&candles) {
            assert!(v.is_finite());
        }
    }
}
