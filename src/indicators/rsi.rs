// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Wilder's momentum gauge over candle closes. Two exponentially smoothed
// accumulators track the average up-move and down-move; their ratio maps
// onto a 0–100 scale:
//
//   rsi = 100 - 100 / (1 + smoothed_gain / smoothed_loss)
//
// Both accumulators seed on the mean of the first `period` close-to-close
// moves and then update at weight 1/period. Conventional rails: above 70
// overbought, below 30 oversold.
// =============================================================================

use crate::market_data::Candle;

/// RSI over candle closes, one value per candle once `period` moves have
/// been consumed by the seed. Needs `period + 1` candles for the first
/// value; an empty series signals insufficient history or a zero period.
/// A non-finite reading truncates the series where it occurs.
pub fn rsi_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() <= period {
        return Vec::new();
    }

    // Seed: plain average of the first `period` moves, split by sign.
    let mut gain_sum = 0.0_f64;
    let mut loss_sum = 0.0_f64;
    for pair in candles.windows(2).take(period) {
        let step = pair[1].close - pair[0].close;
        if step >= 0.0 {
            gain_sum += step;
        } else {
            loss_sum -= step;
        }
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = gain_sum * alpha;
    let mut avg_loss = loss_sum * alpha;

    let mut series = Vec::with_capacity(candles.len() - period);
    match strength_index(avg_gain, avg_loss) {
        Some(value) => series.push(value),
        None => return series,
    }

    // Wilder smoothing, written as an exponential pull toward each move.
    for pair in candles.windows(2).skip(period) {
        let step = pair[1].close - pair[0].close;
        avg_gain += alpha * (step.max(0.0) - avg_gain);
        avg_loss += alpha * ((-step).max(0.0) - avg_loss);

        match strength_index(avg_gain, avg_loss) {
            Some(value) => series.push(value),
            None => return series,
        }
    }

    series
}

/// Latest RSI reading, `None` on insufficient history.
pub fn current_rsi(candles: &[Candle], period: usize) -> Option<f64> {
    rsi_series(candles, period).last().copied()
}

/// Map the smoothed averages onto the 0–100 scale. A one-sided market pins
/// the value to the matching rail; a dead-flat one reads the midline.
fn strength_index(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss > 0.0 {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    } else if avg_gain > 0.0 {
        100.0
    } else {
        50.0
    };
    rsi.is_finite().then_some(rsi)
}
