// =============================================================================
// Statistical Indicators — linear-regression slope and mean-reversion z-score
// =============================================================================
//
// Slope: ordinary least squares on (index, close) over the window.
// Z-score: (last - mean) / stddev over the window; how stretched price is
// from its recent mean in standard deviations.
// =============================================================================

/// Least-squares slope of closes over the last `period` points.
pub fn linreg_slope(closes: &[f64], period: usize) -> Option<f64> {
    if period < 2 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let n = period as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = window.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in window.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }

    if den == 0.0 {
        return None;
    }
    let slope = num / den;
    slope.is_finite().then_some(slope)
}

/// Mean-reversion z-score over the last `period` closes.
///
/// `None` when the window's standard deviation is zero (flat series) or the
/// history is too short.
pub fn zscore(closes: &[f64], period: usize) -> Option<f64> {
    if period < 2 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance =
        window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 || !stddev.is_finite() {
        return None;
    }

    let z = (window[period - 1] - mean) / stddev;
    z.is_finite().then_some(z)
}
