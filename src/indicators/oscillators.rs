// =============================================================================
// Momentum Oscillators — CCI, Williams %R, ROC, Momentum, Ultimate Oscillator
// =============================================================================
//
//   CCI  = (TP - SMA(TP)) / (0.015 * mean deviation),  TP = (H + L + C) / 3
//   %R   = -100 * (highest_high - close) / (highest_high - lowest_low)
//   ROC  = 100 * (close - close[-p]) / close[-p]
//   MOM  = close - close[-p]
//   UO   = 100 * (4*avg7 + 2*avg14 + avg28) / 7, avg_n = sum(BP,n) / sum(TR,n)
// =============================================================================

use crate::market_data::Candle;

/// Commodity Channel Index over the last `period` candles.
pub fn calculate_cci(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let typical: Vec<f64> = window
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();

    let mean = typical.iter().sum::<f64>() / period as f64;
    let mean_dev = typical.iter().map(|tp| (tp - mean).abs()).sum::<f64>() / period as f64;
    if mean_dev == 0.0 {
        return Some(0.0);
    }

    let cci = (typical[period - 1] - mean) / (0.015 * mean_dev);
    cci.is_finite().then_some(cci)
}

/// Williams %R over the last `period` candles; always in [-100, 0].
pub fn calculate_williams_r(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let close = window[period - 1].close;

    let range = highest - lowest;
    if range <= 0.0 {
        return Some(-50.0);
    }

    let wr = -100.0 * (highest - close) / range;
    wr.is_finite().then_some(wr)
}

/// Rate of change in percent over `period` closes.
pub fn calculate_roc(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let past = closes[closes.len() - 1 - period];
    if past == 0.0 {
        return None;
    }
    let roc = 100.0 * (closes[closes.len() - 1] - past) / past;
    roc.is_finite().then_some(roc)
}

/// Absolute momentum: close - close[-period].
pub fn calculate_momentum(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let mom = closes[closes.len() - 1] - closes[closes.len() - 1 - period];
    mom.is_finite().then_some(mom)
}

/// Ultimate Oscillator with the standard (7, 14, 28) windows, in [0, 100].
pub fn calculate_ultimate(candles: &[Candle], short: usize, mid: usize, long: usize) -> Option<f64> {
    if short == 0 || mid == 0 || long == 0 || short >= mid || mid >= long {
        return None;
    }
    if candles.len() < long + 1 {
        return None;
    }

    // Buying pressure and true range per bar (needs the previous close).
    let mut bp = Vec::with_capacity(candles.len() - 1);
    let mut tr = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let true_low = w[1].low.min(w[0].close);
        let true_high = w[1].high.max(w[0].close);
        bp.push(w[1].close - true_low);
        tr.push(true_high - true_low);
    }

    let avg = |n: usize| -> Option<f64> {
        let bp_sum: f64 = bp[bp.len() - n..].iter().sum();
        let tr_sum: f64 = tr[tr.len() - n..].iter().sum();
        if tr_sum <= 0.0 {
            None
        } else {
            Some(bp_sum / tr_sum)
        }
    };

    let a_short = avg(short)?;
    let a_mid = avg(mid)?;
    let a_long = avg(long)?;

    let uo = 100.0 * (4.0 * a_short + 2.0 * a_mid + a_long) / 7.0;
    uo.is_finite().then_some(uo)
}
