// =============================================================================
// Feature Extractor — candles → fixed-length normalized vector
// =============================================================================
//
// Produces the 28-dimensional input consumed by every learner in the
// ensemble. All components are normalized into [-1, 1] via tanh squashing or
// simple scaling. The raw (un-normalized) readings travel alongside the
// vector so a pending signal can carry its full feature context to expiry.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorValues;
use crate::market_data::Candle;
use crate::patterns::PatternScan;
use crate::types::VoteDirection;

/// Number of model inputs.
pub const FEATURE_DIM: usize = 28;

/// Raw readings behind the normalized vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFeatures {
    pub price_change_pct: f64,
    pub volatility: f64,
    pub atr_ratio: f64,
    pub rsi: f64,
    pub rsi_slope: f64,
    pub macd_histogram: f64,
    pub macd_cross: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub trend_strength: f64,
    pub trend_direction: f64,
    pub ema9_slope: f64,
    pub ema21_slope: f64,
    pub ema_cross: f64,
    pub volume_ratio: f64,
    pub volume_trend: f64,
    pub body_ratio: f64,
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
    pub bullish_pattern_score: f64,
    pub bearish_pattern_score: f64,
    pub is_ranging: bool,
    pub is_trending: bool,
    pub regime_strength: f64,
    pub buy_pressure: f64,
    pub sell_pressure: f64,
    pub momentum: f64,
    pub confluence: f64,
}

/// Normalized vector plus its raw record. This is what a pending signal
/// carries forward so the expiry-time model update sees exactly the inputs
/// that produced the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub vector: Vec<f64>,
    pub raw: RawFeatures,
}

/// Minimum history before a feature vector is meaningful.
const MIN_CANDLES: usize = 30;

/// Extract the feature snapshot from a candle window (oldest first) and the
/// already-computed indicator / pattern reads on that window.
pub fn extract(
    candles: &[Candle],
    indicators: &IndicatorValues,
    patterns: &PatternScan,
) -> Option<FeatureSnapshot> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let n = closes.len();
    let last_close = closes[n - 1];
    if last_close <= 0.0 {
        return None;
    }

    let mut raw = RawFeatures::default();

    // Price change and volatility of returns over the last 20 closes.
    raw.price_change_pct = (closes[n - 1] - closes[n - 2]) / closes[n - 2];
    raw.volatility = returns_stddev(&closes[n - 21..]);
    raw.atr_ratio = indicators.atr.map_or(0.0, |a| a / last_close);

    // Momentum block.
    raw.rsi = indicators.rsi.unwrap_or(50.0);
    raw.rsi_slope = match (indicators.rsi, indicators.rsi_prev) {
        (Some(now), Some(prev)) => now - prev,
        _ => 0.0,
    };
    raw.macd_histogram = indicators.macd.map_or(0.0, |m| m.histogram);
    raw.macd_cross = match (indicators.macd, indicators.macd_prev) {
        (Some(now), Some(prev)) => {
            if prev.macd <= prev.signal && now.macd > now.signal {
                1.0
            } else if prev.macd >= prev.signal && now.macd < now.signal {
                -1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    raw.stoch_k = indicators.stochastic.map_or(50.0, |s| s.k);
    raw.stoch_d = indicators.stochastic.map_or(50.0, |s| s.d);

    // Trend block. ADX carries strength; EMA stack carries direction.
    let adx = indicators.adx.unwrap_or(0.0);
    raw.trend_strength = (adx / 50.0).min(1.0);
    raw.trend_direction = match (indicators.ema9, indicators.ema21) {
        (Some(e9), Some(e21)) if e9 > e21 => 1.0,
        (Some(e9), Some(e21)) if e9 < e21 => -1.0,
        _ => 0.0,
    };
    raw.ema9_slope = slope_of(indicators.ema9, indicators.ema9_prev);
    raw.ema21_slope = slope_of(indicators.ema21, indicators.ema21_prev);
    raw.ema_cross = match (
        indicators.ema9,
        indicators.ema21,
        indicators.ema9_prev,
        indicators.ema21_prev,
    ) {
        (Some(e9), Some(e21), Some(p9), Some(p21)) => {
            if p9 <= p21 && e9 > e21 {
                1.0
            } else if p9 >= p21 && e9 < e21 {
                -1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    // Volume proxy block (tick counts).
    let mean_ticks = candles[n - 20..]
        .iter()
        .map(|c| c.tick_count as f64)
        .sum::<f64>()
        / 20.0;
    raw.volume_ratio = if mean_ticks > 0.0 {
        candles[n - 1].tick_count as f64 / mean_ticks
    } else {
        1.0
    };
    raw.volume_trend = match (indicators.obv, indicators.obv_prev) {
        (Some(now), Some(prev)) if now > prev => 1.0,
        (Some(now), Some(prev)) if now < prev => -1.0,
        _ => 0.0,
    };

    // Candle anatomy from the psychology read.
    raw.body_ratio = patterns.psychology.body_ratio;
    raw.upper_wick_ratio = patterns.psychology.upper_wick_ratio;
    raw.lower_wick_ratio = patterns.psychology.lower_wick_ratio;

    // Pattern scores: summed vote weight per side, saturated at 3.
    let side_score = |direction: VoteDirection| -> f64 {
        patterns
            .votes
            .iter()
            .filter(|v| v.direction == direction)
            .map(|v| v.weight)
            .sum::<f64>()
            .min(3.0)
            / 3.0
    };
    raw.bullish_pattern_score = side_score(VoteDirection::Up);
    raw.bearish_pattern_score = side_score(VoteDirection::Down);

    // Regime flags from ADX tiers.
    raw.is_ranging = adx < 20.0;
    raw.is_trending = adx >= 25.0;
    raw.regime_strength = (adx / 50.0).min(1.0);

    // Pressure: bullish vs bearish candle share over the last 10.
    let last10 = &candles[n - 10..];
    raw.buy_pressure = last10.iter().filter(|c| c.is_bullish()).count() as f64 / 10.0;
    raw.sell_pressure = last10.iter().filter(|c| c.is_bearish()).count() as f64 / 10.0;

    raw.momentum = indicators.momentum.unwrap_or(0.0) / last_close;
    raw.confluence = (raw.buy_pressure - raw.sell_pressure).abs();

    let vector = normalize(&raw);
    debug_assert_eq!(vector.len(), FEATURE_DIM);

    Some(FeatureSnapshot { vector, raw })
}

/// Standard deviation of close-to-close returns.
fn returns_stddev(closes: &[f64]) -> f64 {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    var.sqrt()
}

fn slope_of(now: Option<f64>, prev: Option<f64>) -> f64 {
    match (now, prev) {
        (Some(a), Some(b)) => a - b,
        _ => 0.0,
    }
}

/// Map the raw record into the 28-component [-1, 1] vector.
fn normalize(raw: &RawFeatures) -> Vec<f64> {
    vec![
        (raw.price_change_pct * 100.0).tanh(),
        (raw.volatility * 100.0).tanh(),
        (raw.atr_ratio * 100.0).tanh(),
        raw.rsi / 100.0,
        (raw.rsi_slope / 10.0).clamp(-1.0, 1.0),
        (raw.macd_histogram * 100.0).tanh(),
        raw.macd_cross,
        raw.stoch_k / 100.0,
        raw.stoch_d / 100.0,
        raw.trend_strength,
        raw.trend_direction,
        (raw.ema9_slope * 1000.0).tanh(),
        (raw.ema21_slope * 1000.0).tanh(),
        raw.ema_cross,
        raw.volume_ratio.min(3.0) / 3.0,
        raw.volume_trend,
        raw.body_ratio,
        raw.upper_wick_ratio,
        raw.lower_wick_ratio,
        raw.bullish_pattern_score,
        raw.bearish_pattern_score,
        if raw.is_ranging { 1.0 } else { 0.0 },
        if raw.is_trending { 1.0 } else { 0.0 },
        raw.regime_strength,
        raw.buy_pressure,
        raw.sell_pressure,
        (raw.momentum * 100.0).tanh(),
        raw.confluence,
    ]
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_all;
    use crate::patterns::scan;

    fn candle(i: usize, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: close - 0.2,
            high: close + 0.5,
            low: close - 0.5,
            close,
            start_epoch: (i as i64) * 60,
            tick_count: 12,
            is_forming: false,
        }
    }

    fn window(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(i, 100.0 + (i as f64 * 0.3).sin() * 2.0 + i as f64 * 0.02))
            .collect()
    }

    #[test]
    fn insufficient_history_is_none() {
        let candles = window(10);
        let indicators = compute_all(&candles);
        let patterns = scan(&candles);
        assert!(extract(&candles, &indicators, &patterns).is_none());
    }

    #[test]
    fn vector_has_expected_dimension_and_bounds() {
        let candles = window(120);
        let indicators = compute_all(&candles);
        let patterns = scan(&candles);
        let snapshot = extract(&candles, &indicators, &patterns).unwrap();

        assert_eq!(snapshot.vector.len(), FEATURE_DIM);
        for (i, &v) in snapshot.vector.iter().enumerate() {
            assert!(v.is_finite(), "component {i} not finite");
            assert!(
                (-1.0..=1.0).contains(&v),
                "component {i} out of bounds: {v}"
            );
        }
    }

    #[test]
    fn trend_direction_follows_ema_stack() {
        let rising: Vec<Candle> = (0..120)
            .map(|i| candle(i, 100.0 + i as f64 * 0.5))
            .collect();
        let indicators = compute_all(&rising);
        let patterns = scan(&rising);
        let snapshot = extract(&rising, &indicators, &patterns).unwrap();
        assert_eq!(snapshot.raw.trend_direction, 1.0);
        assert!(snapshot.raw.buy_pressure > snapshot.raw.sell_pressure);
    }

    #[test]
    fn deterministic_extraction() {
        let candles = window(120);
        let indicators = compute_all(&candles);
        let patterns = scan(&candles);
        let a = extract(&candles, &indicators, &patterns).unwrap();
        let b = extract(&candles, &indicators, &patterns).unwrap();
        assert_eq!(a.vector, b.vector);
    }

    #[test]
    fn confluence_is_pressure_gap() {
        let candles = window(120);
        let indicators = compute_all(&candles);
        let patterns = scan(&candles);
        let s = extract(&candles, &indicators, &patterns).unwrap();
        assert!(
            (s.raw.confluence - (s.raw.buy_pressure - s.raw.sell_pressure).abs()).abs() < 1e-12
        );
    }
}
