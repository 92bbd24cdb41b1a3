// =============================================================================
// Average Directional Index (ADX) — Wilder's method
// =============================================================================
//
//   +DM = max(H_t - H_{t-1}, 0)  when it exceeds the down-move
//   -DM = max(L_{t-1} - L_t, 0)  when it exceeds the up-move
//   DI± = 100 * smoothed(±DM) / smoothed(TR)
//   DX  = 100 * |DI+ - DI-| / (DI+ + DI-)
//   ADX = Wilder-smoothed DX
//
// Interpretation tiers used by the regime detector: < 12 ranging,
// >= 18 trending, >= 25 strong trend.
// =============================================================================

use crate::market_data::Candle;

/// Directional-indicator snapshot: (DI+, DI-).
pub fn directional_indicators(candles: &[Candle], period: usize) -> Option<(f64, f64)> {
    let (di_plus, di_minus, _) = directional_series(candles, period)?;
    Some((di_plus, di_minus))
}

/// Most recent ADX value.
///
/// Needs `2 * period` candles: `period` to seed the DM/TR smoothing and
/// another `period` of DX values to seed the ADX smoothing.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<f64> {
    let (_, _, adx) = directional_series(candles, period)?;
    Some(adx)
}

fn directional_series(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut tr = Vec::with_capacity(candles.len() - 1);

    for w in candles.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;

        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });

        let hl = w[1].high - w[1].low;
        let hc = (w[1].high - w[0].close).abs();
        let lc = (w[1].low - w[0].close).abs();
        tr.push(hl.max(hc).max(lc));
    }

    let period_f = period as f64;
    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();
    let mut sm_tr: f64 = tr[..period].iter().sum();

    let di = |plus: f64, minus: f64, tr_sum: f64| -> Option<(f64, f64, f64)> {
        if tr_sum <= 0.0 {
            return None;
        }
        let di_plus = 100.0 * plus / tr_sum;
        let di_minus = 100.0 * minus / tr_sum;
        let denom = di_plus + di_minus;
        let dx = if denom == 0.0 {
            0.0
        } else {
            100.0 * (di_plus - di_minus).abs() / denom
        };
        Some((di_plus, di_minus, dx))
    };

    let (mut di_plus, mut di_minus, first_dx) = di(sm_plus, sm_minus, sm_tr)?;
    let mut dx_values = vec![first_dx];

    for i in period..tr.len() {
        sm_plus = sm_plus - sm_plus / period_f + plus_dm[i];
        sm_minus = sm_minus - sm_minus / period_f + minus_dm[i];
        sm_tr = sm_tr - sm_tr / period_f + tr[i];

        let (p, m, dx) = di(sm_plus, sm_minus, sm_tr)?;
        di_plus = p;
        di_minus = m;
        dx_values.push(dx);
    }

    if dx_values.len() < period {
        return None;
    }

    let mut adx: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    for &dx in &dx_values[period..] {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
    }

    adx.is_finite().then_some((di_plus, di_minus, adx))
}
