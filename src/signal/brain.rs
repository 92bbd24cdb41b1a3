// =============================================================================
// Advanced Brain — vote aggregation, strategy heads, validation, confidence
// =============================================================================
//
// The brain sits between raw votes and the emitted signal:
//
//   1. tally the weighted vote pool into probabilities and ratios
//   2. add eleven strategy-head votes on top of the indicator votes
//   3. validate the candidate signal against quality gates
//   4. derive the final confidence with regime / momentum / ML adjustments
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::rsi::rsi_series;
use crate::indicators::{bollinger, IndicatorValues, TrendDirection};
use crate::market_data::Candle;
use crate::patterns::{Bias, PsychologyAnalysis};
use crate::regime::{momentum_alignment, Regime, RegimeAssessment};
use crate::types::{Direction, Vote, VoteDirection};

const EPSILON: f64 = 1e-9;

/// Weight at or above which a vote counts as "strong".
const STRONG_VOTE_WEIGHT: f64 = 1.0;

/// Quality floor below which a signal is rejected outright.
const QUALITY_FLOOR: f64 = 45.0;

// =============================================================================
// Vote tally
// =============================================================================

/// Aggregated view of a vote pool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VoteTally {
    pub up_weight: f64,
    pub down_weight: f64,
    pub p_up: f64,
    pub p_down: f64,
    /// Dominant-side weight share of all directional weight.
    pub alignment_ratio: f64,
    /// Minority-side weight share of all directional weight.
    pub conflict_ratio: f64,
    /// Count of votes with weight >= 1.0.
    pub strong_votes: u32,
    /// Count of votes agreeing with the dominant side.
    pub aligned_count: u32,
    pub total_votes: u32,
}

impl VoteTally {
    pub fn dominant_direction(&self) -> Direction {
        if self.up_weight > self.down_weight {
            Direction::Call
        } else if self.down_weight > self.up_weight {
            Direction::Put
        } else {
            Direction::NoTrade
        }
    }

    /// 2 * |pUp - 0.5|, in [0, 1].
    pub fn direction_strength(&self) -> f64 {
        2.0 * (self.p_up - 0.5).abs()
    }
}

/// Fold a vote pool into its tally.
pub fn tally(votes: &[Vote]) -> VoteTally {
    let mut t = VoteTally::default();

    for vote in votes {
        t.total_votes += 1;
        match vote.direction {
            VoteDirection::Up => t.up_weight += vote.weight,
            VoteDirection::Down => t.down_weight += vote.weight,
            VoteDirection::Neutral => {}
        }
        if vote.weight >= STRONG_VOTE_WEIGHT && vote.direction != VoteDirection::Neutral {
            t.strong_votes += 1;
        }
    }

    let directional = t.up_weight + t.down_weight;
    t.p_up = t.up_weight / (directional + EPSILON);
    t.p_down = 1.0 - t.p_up;

    if directional > 0.0 {
        t.alignment_ratio = t.up_weight.max(t.down_weight) / directional;
        t.conflict_ratio = t.up_weight.min(t.down_weight) / directional;
    }

    let dominant = if t.up_weight >= t.down_weight {
        VoteDirection::Up
    } else {
        VoteDirection::Down
    };
    t.aligned_count = votes
        .iter()
        .filter(|v| v.direction == dominant)
        .count() as u32;

    t
}

/// Quality score in [0, 100]: a weighted mix of alignment, strong-vote
/// adequacy, inverse conflict and the regime penalty.
pub fn quality_score(t: &VoteTally, regime_penalty: f64) -> f64 {
    if t.total_votes == 0 {
        return 0.0;
    }
    let alignment = t.alignment_ratio;
    let strong = (t.strong_votes as f64 / 4.0).min(1.0);
    let calm = (1.0 - t.conflict_ratio / 0.5).clamp(0.0, 1.0);

    (40.0 * alignment + 20.0 * strong + 20.0 * calm + 20.0 * regime_penalty)
        .clamp(0.0, 100.0)
}

/// Base confidence before the final adjustments: raw edge scaled by
/// alignment, strong-vote adequacy, conflict and regime.
pub fn base_confidence(t: &VoteTally, regime_penalty: f64) -> f64 {
    let edge = (t.p_up - 0.5).abs() * 180.0;
    let alignment_factor = 0.6 + 0.4 * t.alignment_ratio;
    let strong_factor = 0.7 + 0.3 * (t.strong_votes as f64 / 4.0).min(1.0);
    let conflict_factor = 1.0 - (t.conflict_ratio * 0.8).min(0.5);

    (edge * alignment_factor * strong_factor * conflict_factor * regime_penalty)
        .clamp(0.0, 100.0)
}

// =============================================================================
// Strategy heads
// =============================================================================

/// Bullish/bearish divergence between price extremes and RSI over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceRead {
    Bullish,
    Bearish,
    None,
}

/// Detect price/RSI divergence over the last 15 candles.
pub fn detect_divergence(candles: &[Candle]) -> DivergenceRead {
    if candles.len() < 30 {
        return DivergenceRead::None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let rsi_values = rsi_series(candles, 14);
    if rsi_values.len() < 15 {
        return DivergenceRead::None;
    }

    let price_tail = &closes[closes.len() - 15..];
    let rsi_tail = &rsi_values[rsi_values.len() - 15..];
    let half = 7;

    let min_pos = |s: &[f64]| {
        s.iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &v)| (i, v))
            .unwrap_or((0, 0.0))
    };
    let max_pos = |s: &[f64]| {
        s.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &v)| (i, v))
            .unwrap_or((0, 0.0))
    };

    // Bullish: price printed a lower low while RSI held a higher low.
    let (_, early_price_low) = min_pos(&price_tail[..half]);
    let (_, late_price_low) = min_pos(&price_tail[half..]);
    let (_, early_rsi_low) = min_pos(&rsi_tail[..half]);
    let (_, late_rsi_low) = min_pos(&rsi_tail[half..]);
    if late_price_low < early_price_low && late_rsi_low > early_rsi_low + 2.0 {
        return DivergenceRead::Bullish;
    }

    // Bearish: price printed a higher high while RSI rolled over.
    let (_, early_price_high) = max_pos(&price_tail[..half]);
    let (_, late_price_high) = max_pos(&price_tail[half..]);
    let (_, early_rsi_high) = max_pos(&rsi_tail[..half]);
    let (_, late_rsi_high) = max_pos(&rsi_tail[half..]);
    if late_price_high > early_price_high && late_rsi_high < early_rsi_high - 2.0 {
        return DivergenceRead::Bearish;
    }

    DivergenceRead::None
}

/// The eleven strategy heads. Each contributes at most one vote on top of
/// the indicator pool.
pub fn strategy_votes(
    candles: &[Candle],
    indicators: &IndicatorValues,
    psychology: &PsychologyAnalysis,
) -> Vec<Vote> {
    let mut votes = Vec::new();
    let n = candles.len();
    if n < 30 {
        return votes;
    }
    let last = &candles[n - 1];

    let short_up = matches!(
        (indicators.ema9, indicators.ema21),
        (Some(e9), Some(e21)) if e9 > e21
    );
    let short_down = matches!(
        (indicators.ema9, indicators.ema21),
        (Some(e9), Some(e21)) if e9 < e21
    );

    // 1. Multi-horizon trend alignment: short EMA trend agreeing with the
    //    long moving-average structure.
    let long_up = match (indicators.sma50, indicators.sma200) {
        (Some(s50), Some(s200)) => Some(s50 > s200),
        _ => match (indicators.ema21, indicators.ema50) {
            (Some(e21), Some(e50)) => Some(e21 > e50),
            _ => None,
        },
    };
    if let Some(long_is_up) = long_up {
        if short_up && long_is_up {
            votes.push(Vote::new(
                "trend_alignment",
                VoteDirection::Up,
                1.5,
                "short and long horizons both trending up",
            ));
        } else if short_down && !long_is_up {
            votes.push(Vote::new(
                "trend_alignment",
                VoteDirection::Down,
                1.5,
                "short and long horizons both trending down",
            ));
        }
    }

    // 2. Divergence reversal.
    match detect_divergence(candles) {
        DivergenceRead::Bullish => votes.push(Vote::new(
            "divergence",
            VoteDirection::Up,
            1.4,
            "bullish RSI divergence at the lows",
        )),
        DivergenceRead::Bearish => votes.push(Vote::new(
            "divergence",
            VoteDirection::Down,
            1.4,
            "bearish RSI divergence at the highs",
        )),
        DivergenceRead::None => {}
    }

    // 3. Squeeze breakout: compression followed by an expansion bar.
    if n >= 4 {
        let was_squeezed = bollinger::is_squeeze(&candles[..n - 1]).unwrap_or(false);
        let avg_range = candles[n - 11..n - 1]
            .iter()
            .map(Candle::range)
            .sum::<f64>()
            / 10.0;
        if was_squeezed && avg_range > 0.0 && last.range() > 1.5 * avg_range {
            let dir = if last.is_bullish() {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            votes.push(Vote::new(
                "squeeze_breakout",
                dir,
                1.3,
                "expansion bar out of a volatility squeeze",
            ));
        }
    }

    // 4. Mean reversion at statistical extremes.
    if let (Some(z), Some(rsi)) = (indicators.zscore, indicators.rsi) {
        if z >= 2.2 && rsi >= 70.0 {
            votes.push(Vote::new(
                "mean_reversion",
                VoteDirection::Down,
                1.3,
                "stretched above the mean with RSI overbought",
            ));
        } else if z <= -2.2 && rsi <= 30.0 {
            votes.push(Vote::new(
                "mean_reversion",
                VoteDirection::Up,
                1.3,
                "stretched below the mean with RSI oversold",
            ));
        }
    }

    // 5. Momentum continuation in an established trend.
    if let (Some(roc), Some(momentum), Some(adx)) =
        (indicators.roc, indicators.momentum, indicators.adx)
    {
        if adx >= 18.0 && roc.signum() == momentum.signum() && roc.abs() >= 0.15 {
            let dir = if roc > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            votes.push(Vote::new(
                "momentum_continuation",
                dir,
                1.2,
                "momentum confirming an established trend",
            ));
        }
    }

    // 6. Volatility expansion bar.
    let avg_range10 = candles[n - 11..n - 1]
        .iter()
        .map(Candle::range)
        .sum::<f64>()
        / 10.0;
    if avg_range10 > 0.0 && last.range() > 2.0 * avg_range10 && last.body() > 0.5 * last.range()
    {
        let dir = if last.is_bullish() {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        votes.push(Vote::new(
            "volatility_expansion",
            dir,
            1.0,
            "decisive range expansion",
        ));
    }

    // 7. Candlestick pattern confirmed by the short trend.
    match (psychology.bias, short_up, short_down) {
        (Bias::Bullish, true, _) => votes.push(Vote::new(
            "pattern_with_trend",
            VoteDirection::Up,
            1.2,
            "bullish candle pattern inside an uptrend",
        )),
        (Bias::Bearish, _, true) => votes.push(Vote::new(
            "pattern_with_trend",
            VoteDirection::Down,
            1.2,
            "bearish candle pattern inside a downtrend",
        )),
        _ => {}
    }

    // 8. Go with the flow: 3-5 consecutive same-direction candles aligned
    //    with the short trend.
    let mut run = 0usize;
    let mut run_up = false;
    for c in candles[n.saturating_sub(5)..].iter().rev() {
        if c.is_bullish() {
            if run == 0 || run_up {
                run += 1;
                run_up = true;
            } else {
                break;
            }
        } else if c.is_bearish() {
            if run == 0 || !run_up {
                run += 1;
                run_up = false;
            } else {
                break;
            }
        } else {
            break;
        }
    }
    if (3..=5).contains(&run) {
        if run_up && short_up {
            votes.push(Vote::new(
                "go_with_flow",
                VoteDirection::Up,
                1.0,
                format!("{run} consecutive bullish candles with the trend"),
            ));
        } else if !run_up && short_down {
            votes.push(Vote::new(
                "go_with_flow",
                VoteDirection::Down,
                1.0,
                format!("{run} consecutive bearish candles with the trend"),
            ));
        }
    }

    // 9. Exhaustion: an oversized body into an RSI extreme.
    let mean_body = candles[n - 11..n - 1].iter().map(Candle::body).sum::<f64>() / 10.0;
    if let Some(rsi) = indicators.rsi {
        if mean_body > 0.0 && last.body() >= 2.0 * mean_body {
            if last.is_bullish() && rsi >= 75.0 {
                votes.push(Vote::new(
                    "exhaustion",
                    VoteDirection::Down,
                    1.1,
                    "climactic bullish bar into overbought RSI",
                ));
            } else if last.is_bearish() && rsi <= 25.0 {
                votes.push(Vote::new(
                    "exhaustion",
                    VoteDirection::Up,
                    1.1,
                    "climactic bearish bar into oversold RSI",
                ));
            }
        }
    }

    // 10. Multi-factor confluence counter.
    let (bullish_factors, bearish_factors) = confluence_factors(candles, indicators);
    if bullish_factors >= 5 && bullish_factors >= bearish_factors + 2 {
        votes.push(Vote::new(
            "confluence",
            VoteDirection::Up,
            (0.8 + bullish_factors as f64 * 0.1).min(1.8),
            format!("{bullish_factors} bullish factors in confluence"),
        ));
    } else if bearish_factors >= 5 && bearish_factors >= bullish_factors + 2 {
        votes.push(Vote::new(
            "confluence",
            VoteDirection::Down,
            (0.8 + bearish_factors as f64 * 0.1).min(1.8),
            format!("{bearish_factors} bearish factors in confluence"),
        ));
    }

    // 11. Price action: three-bar reversal, gap fill bias, PSAR side.
    if let Some(v) = price_action_vote(candles, indicators) {
        votes.push(v);
    }

    votes
}

/// Count simple directional facts for the confluence head.
fn confluence_factors(candles: &[Candle], indicators: &IndicatorValues) -> (u32, u32) {
    let last_close = candles.last().map(|c| c.close).unwrap_or(0.0);
    let mut bullish = 0u32;
    let mut bearish = 0u32;
    let mut credit = |cond_up: Option<bool>| match cond_up {
        Some(true) => bullish += 1,
        Some(false) => bearish += 1,
        None => {}
    };

    credit(match (indicators.ema9, indicators.ema21) {
        (Some(a), Some(b)) if a != b => Some(a > b),
        _ => None,
    });
    credit(indicators.macd.map(|m| m.histogram > 0.0));
    credit(indicators.rsi.map(|r| r > 50.0));
    credit(indicators.stochastic.map(|s| s.k > s.d));
    credit(indicators.psar.map(|p| p.is_uptrend));
    credit(
        indicators
            .supertrend
            .map(|s| s.direction == TrendDirection::Up),
    );
    credit(match (indicators.obv, indicators.obv_prev) {
        (Some(a), Some(b)) if a != b => Some(a > b),
        _ => None,
    });
    credit(indicators.sma20.map(|s| last_close > s));
    credit(indicators.roc.map(|r| r > 0.0));
    credit(indicators.linreg_slope.map(|s| s > 0.0));

    (bullish, bearish)
}

/// Three-bar reversal, fair-value-gap direction and PSAR bias folded into a
/// single price-action vote.
fn price_action_vote(candles: &[Candle], indicators: &IndicatorValues) -> Option<Vote> {
    let n = candles.len();
    if n < 3 {
        return None;
    }
    let (a, b, c) = (&candles[n - 3], &candles[n - 2], &candles[n - 1]);

    let mut up_score: f64 = 0.0;
    let mut down_score: f64 = 0.0;

    // Three-bar reversal.
    if a.is_bearish() && b.low < a.low && c.is_bullish() && c.close > b.high {
        up_score += 1.0;
    } else if a.is_bullish() && b.high > a.high && c.is_bearish() && c.close < b.low {
        down_score += 1.0;
    }

    // Open gap in the last three bars pulls price toward it.
    if c.low > a.high {
        down_score += 0.4;
    } else if a.low > c.high {
        up_score += 0.4;
    }

    // PSAR side as the tiebreaker.
    if let Some(psar) = indicators.psar {
        if psar.is_uptrend {
            up_score += 0.3;
        } else {
            down_score += 0.3;
        }
    }

    let (direction, score) = if up_score > down_score {
        (VoteDirection::Up, up_score)
    } else if down_score > up_score {
        (VoteDirection::Down, down_score)
    } else {
        return None;
    };
    if score < 0.7 {
        return None;
    }

    Some(Vote::new(
        "price_action",
        direction,
        (0.6 + score * 0.4).min(1.5),
        "three-bar structure and gap bias",
    ))
}

// =============================================================================
// Validation
// =============================================================================

/// Gate parameters sourced from the adaptive thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ValidationGates {
    pub max_conflict_ratio: f64,
    pub min_aligned_indicators: u32,
}

/// Validate a candidate directional signal. `Err` carries the human-readable
/// rejection reason.
pub fn validate(
    candles: &[Candle],
    indicators: &IndicatorValues,
    t: &VoteTally,
    quality: f64,
    regime: &RegimeAssessment,
    direction: Direction,
    gates: &ValidationGates,
) -> Result<(), String> {
    if quality < QUALITY_FLOOR {
        return Err(format!("quality score {quality:.0} below rejection floor"));
    }

    // At least two independent support pillars.
    let trend_support = match direction {
        Direction::Call => matches!(regime.regime, Regime::TrendingUp),
        Direction::Put => matches!(regime.regime, Regime::TrendingDown),
        Direction::NoTrade => false,
    };
    let momentum_support = momentum_alignment(indicators, direction);
    let strong_consensus = t.strong_votes >= 3;
    let weight_ratio_support = t.alignment_ratio > 0.58;

    let supports = [
        trend_support,
        momentum_support,
        strong_consensus,
        weight_ratio_support,
    ]
    .iter()
    .filter(|&&s| s)
    .count();
    if supports < 2 {
        return Err(format!("only {supports} of 4 support pillars present"));
    }

    if t.conflict_ratio > gates.max_conflict_ratio {
        return Err(format!(
            "conflict ratio {:.2} above gate {:.2}",
            t.conflict_ratio, gates.max_conflict_ratio
        ));
    }

    if t.aligned_count < gates.min_aligned_indicators {
        return Err(format!(
            "only {} aligned indicators, need {}",
            t.aligned_count, gates.min_aligned_indicators
        ));
    }

    // Counter-trend entries need extra confirmation.
    let n = candles.len();
    if n >= 6 {
        let short_trend_up = candles[n - 1].close > candles[n - 6].close;
        let against_short_trend = match direction {
            Direction::Call => !short_trend_up,
            Direction::Put => short_trend_up,
            Direction::NoTrade => false,
        };
        let confirmation_factors =
            supports as f64 + t.strong_votes as f64 * 0.5 + quality / 100.0;
        if against_short_trend && confirmation_factors < 2.5 {
            return Err(format!(
                "counter-trend signal with confirmation {confirmation_factors:.1} < 2.5"
            ));
        }
    }

    // An unresolved divergence against the signal kills low-quality setups.
    let divergence = detect_divergence(candles);
    let divergence_contradicts = matches!(
        (direction, divergence),
        (Direction::Call, DivergenceRead::Bearish) | (Direction::Put, DivergenceRead::Bullish)
    );
    if divergence_contradicts && quality < 60.0 {
        return Err("momentum divergence contradicts the signal at low quality".into());
    }

    Ok(())
}

// =============================================================================
// Final confidence
// =============================================================================

/// ML agreement class for the confidence adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlAgreement {
    AgreesPremium,
    Agrees,
    Disagrees,
    Absent,
}

/// Final confidence before the cosmetic jitter: base edge, quality bonus,
/// regime / momentum / divergence bonuses, ML adjustment. Clamped to
/// [55, 92].
pub fn final_confidence(
    t: &VoteTally,
    quality: f64,
    regime: &RegimeAssessment,
    direction: Direction,
    divergence_supports: bool,
    ml: MlAgreement,
) -> f64 {
    let mut confidence = 55.0 + t.direction_strength() * 30.0;
    confidence += 0.30 * quality;

    let regime_supports = matches!(
        (direction, regime.regime),
        (Direction::Call, Regime::TrendingUp) | (Direction::Put, Regime::TrendingDown)
    );
    if regime_supports {
        confidence += 3.0 * regime.strength;
    }
    if regime.momentum_aligned {
        confidence += 2.0;
    }
    if divergence_supports {
        confidence += 2.0;
    }

    confidence += match ml {
        MlAgreement::AgreesPremium => 5.0,
        MlAgreement::Agrees => 3.0,
        MlAgreement::Disagrees => -8.0,
        MlAgreement::Absent => 0.0,
    };

    confidence.clamp(55.0, 92.0)
}
