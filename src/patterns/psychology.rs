// =============================================================================
// Candle Psychology — body/wick anatomy, order blocks, fair value gaps
// =============================================================================
//
// Reads the last few candles for the micro-structure facts the brain and the
// feature extractor both consume: how much of the candle is body vs wick,
// whether it is a doji, which side is in control, whether an institutional
// order block is likely, and whether a fair value gap is open.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::Vote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Default for Bias {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Full psychology read over the analysed window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PsychologyAnalysis {
    /// Body size as a fraction of the candle range, last candle.
    pub body_ratio: f64,
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
    pub is_doji: bool,
    /// Names of every candlestick pattern detected on the window.
    pub patterns: Vec<String>,
    pub bias: Bias,
    /// Probability in [0, 1] that the last candle marks an order block.
    pub order_block_probability: f64,
    pub fvg_detected: bool,
}

/// Anatomy ratios of a single candle: (body, upper wick, lower wick), each as
/// a fraction of the full range. A zero-range candle reads as all body.
pub fn anatomy(candle: &Candle) -> (f64, f64, f64) {
    let range = candle.range();
    if range <= 0.0 {
        return (1.0, 0.0, 0.0);
    }
    (
        candle.body() / range,
        candle.upper_wick() / range,
        candle.lower_wick() / range,
    )
}

/// Body smaller than a tenth of the range reads as indecision.
pub fn is_doji(candle: &Candle) -> bool {
    let (body, _, _) = anatomy(candle);
    body < 0.1
}

/// Order-block probability: directional agreement across the last 5 candles
/// combined with an oversized final body.
pub fn order_block_probability(candles: &[Candle]) -> f64 {
    if candles.len() < 5 {
        return 0.0;
    }
    let window = &candles[candles.len() - 5..];

    let bullish = window.iter().filter(|c| c.is_bullish()).count() as f64;
    let bearish = window.iter().filter(|c| c.is_bearish()).count() as f64;
    let agreement = bullish.max(bearish) / 5.0;

    let mean_body = window.iter().map(Candle::body).sum::<f64>() / 5.0;
    let last_body = window[4].body();
    let impulse = if mean_body > 0.0 && last_body >= 1.5 * mean_body {
        0.3
    } else {
        0.0
    };

    ((agreement - 0.5).max(0.0) * 1.4 + impulse).clamp(0.0, 1.0)
}

/// Fair value gap: the middle candle of the last three left a price void.
/// Bullish when `third.low > first.high`, bearish when `first.low > third.high`.
pub fn fair_value_gap(candles: &[Candle]) -> Option<Bias> {
    if candles.len() < 3 {
        return None;
    }
    let w = &candles[candles.len() - 3..];
    if w[2].low > w[0].high {
        Some(Bias::Bullish)
    } else if w[0].low > w[2].high {
        Some(Bias::Bearish)
    } else {
        None
    }
}

/// Full psychology read: anatomy of the last candle, candlestick pattern
/// names, aggregate bias and structural features.
pub fn analyze(candles: &[Candle], pattern_votes: &[Vote]) -> PsychologyAnalysis {
    let last = match candles.last() {
        Some(c) => c,
        None => return PsychologyAnalysis::default(),
    };

    let (body_ratio, upper_wick_ratio, lower_wick_ratio) = anatomy(last);

    let up_weight: f64 = pattern_votes
        .iter()
        .filter(|v| v.direction == crate::types::VoteDirection::Up)
        .map(|v| v.weight)
        .sum();
    let down_weight: f64 = pattern_votes
        .iter()
        .filter(|v| v.direction == crate::types::VoteDirection::Down)
        .map(|v| v.weight)
        .sum();

    let bias = if up_weight > down_weight * 1.2 {
        Bias::Bullish
    } else if down_weight > up_weight * 1.2 {
        Bias::Bearish
    } else {
        Bias::Neutral
    };

    PsychologyAnalysis {
        body_ratio,
        upper_wick_ratio,
        lower_wick_ratio,
        is_doji: is_doji(last),
        patterns: pattern_votes.iter().map(|v| v.indicator.clone()).collect(),
        bias,
        order_block_probability: order_block_probability(candles),
        fvg_detected: fair_value_gap(candles).is_some(),
    }
}
