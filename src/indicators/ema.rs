// =============================================================================
// Moving Averages — EMA, SMA, Hull MA, EMA ribbon
// =============================================================================
//
// All the moving-average flavours the vote rules and the MACD stack lean on.
// The EMA is written as exponential smoothing: each close pulls the running
// level toward itself by a fixed fraction,
//
//   level += alpha * (close - level),   alpha = 2 / (period + 1)
//
// seeded on the mean of the first `period` closes. The Hull MA trades a
// little noise for a lot of lag:
//   HMA = WMA(2 * WMA(n/2) - WMA(n), sqrt(n))
// =============================================================================

/// Periods that make up the EMA ribbon.
pub const RIBBON_PERIODS: [usize; 5] = [5, 9, 12, 21, 50];

/// EMA series for `closes`, one value per close from index `period - 1`
/// onward. A zero period or an input shorter than the seed window yields an
/// empty series; a non-finite level truncates the series where it occurs.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut level = closes[..period].iter().sum::<f64>() / period as f64;
    if !level.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(closes.len() + 1 - period);
    series.push(level);

    for &close in &closes[period..] {
        level += alpha * (close - level);
        if !level.is_finite() {
            break;
        }
        series.push(level);
    }

    series
}

/// Compute the SMA series for `closes` with look-back `period`.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    let mut window_sum: f64 = closes[..period].iter().sum();
    result.push(window_sum / period as f64);

    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        let sma = window_sum / period as f64;
        if !sma.is_finite() {
            break;
        }
        result.push(sma);
    }

    result
}

/// Linearly weighted moving average over the last `period` values, newest
/// weighted highest.
fn wma_last(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let denom = (period * (period + 1)) as f64 / 2.0;
    let num: f64 = window
        .iter()
        .enumerate()
        .map(|(i, &v)| v * (i + 1) as f64)
        .sum();
    let wma = num / denom;
    wma.is_finite().then_some(wma)
}

/// Hull Moving Average for the most recent close.
///
/// Needs `period + sqrt(period)` closes; returns `None` otherwise.
pub fn hull_ma(closes: &[f64], period: usize) -> Option<f64> {
    if period < 2 {
        return None;
    }
    let sqrt_period = (period as f64).sqrt().round() as usize;
    if closes.len() < period + sqrt_period {
        return None;
    }

    // Build the 2*WMA(n/2) - WMA(n) intermediate series over the tail so the
    // final smoothing WMA has sqrt(n) points to work with.
    let half = (period / 2).max(1);
    let mut raw = Vec::with_capacity(sqrt_period);
    for offset in (0..sqrt_period).rev() {
        let end = closes.len() - offset;
        let slice = &closes[..end];
        let w_half = wma_last(slice, half)?;
        let w_full = wma_last(slice, period)?;
        raw.push(2.0 * w_half - w_full);
    }

    wma_last(&raw, sqrt_period)
}

/// Mean of the latest EMA values over [`RIBBON_PERIODS`].
///
/// `None` until the longest ribbon period has enough history.
pub fn ema_ribbon(closes: &[f64]) -> Option<f64> {
    let mut sum = 0.0;
    for period in RIBBON_PERIODS {
        sum += *calculate_ema(closes, period).last()?;
    }
    Some(sum / RIBBON_PERIODS.len() as f64)
}
