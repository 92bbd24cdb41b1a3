// =============================================================================
// SignalEngine — the single `generate` entry orchestrating the pipeline
// =============================================================================
//
// Pipeline per candle close:
//
//   1. history precondition (>= 50 closed candles)
//   2. regime gate (choppy / hostile markets are refused outright)
//   3. indicator + pattern + volatility snapshot on closed ++ forming
//   4. indicator votes, base tally, quality score
//   5. strategy-head votes
//   6. ML fusion, gated by the adaptive thresholds
//   7. validation checklist
//   8. final confidence + per-symbol anti-repeat variation
//   9. emission (directional, or NO_TRADE with a suggested direction)
//
// Any failure inside the pipeline degrades to NO_TRADE; this function never
// panics on market data.
//
// The confidence variation is cosmetic: the emit decision is made on the
// un-jittered value, and the jitter RNG is seeded from (symbol, close time)
// so identical inputs always produce identical output.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::indicators::compute_all;
use crate::market_data::Candle;
use crate::ml::{features, MlEnsemble};
use crate::patterns::scan;
use crate::regime::{assess, PriceAction, Regime, VolatilityLevel};
use crate::thresholds::AdaptiveThresholds;
use crate::types::{Direction, Tier, Vote, VoteDirection};
use crate::volatility;

use super::brain::{
    self, base_confidence, final_confidence, quality_score, strategy_votes, tally,
    DivergenceRead, MlAgreement, ValidationGates,
};
use super::votes::indicator_votes;
use super::{SignalOptions, SignalResult};

/// Minimum closed candles before any signal may be generated.
pub const MIN_CLOSED_CANDLES: usize = 50;

/// Directional strength below which the pipeline abstains.
const MIN_DIRECTION_STRENGTH: f64 = 0.12;

/// Anti-repeat window for the confidence variation.
const VARIATION_WINDOW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy)]
struct LastConfidence {
    value: f64,
    epoch: i64,
}

pub struct SignalEngine {
    ml: Arc<RwLock<MlEnsemble>>,
    thresholds: Arc<RwLock<AdaptiveThresholds>>,
    /// Last emitted confidence per symbol, for the anti-repeat variation.
    variation: RwLock<HashMap<String, LastConfidence>>,
}

impl SignalEngine {
    pub fn new(
        ml: Arc<RwLock<MlEnsemble>>,
        thresholds: Arc<RwLock<AdaptiveThresholds>>,
    ) -> Self {
        Self {
            ml,
            thresholds,
            variation: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a signal for one closed candle.
    ///
    /// `closed` is the closed-candle window (oldest first), `forming` the
    /// candle under construction after the close, `candle_close_time` the
    /// epoch at which the triggering candle closed and `now_epoch` the
    /// wall-clock time of the call.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        session_id: &str,
        symbol: &str,
        timeframe: i64,
        closed: &[Candle],
        forming: Option<&Candle>,
        candle_close_time: i64,
        now_epoch: i64,
        options: &SignalOptions,
    ) -> SignalResult {
        // ── 1. History precondition ─────────────────────────────────────
        if closed.len() < MIN_CLOSED_CANDLES {
            debug!(
                symbol,
                have = closed.len(),
                need = MIN_CLOSED_CANDLES,
                "insufficient history"
            );
            return SignalResult::no_trade(
                session_id,
                symbol,
                timeframe,
                now_epoch,
                candle_close_time,
                closed.len(),
            );
        }

        // ── 2-3. Snapshot: closed ++ forming ────────────────────────────
        let mut estimated: Vec<Candle> = closed.to_vec();
        if let Some(f) = forming {
            estimated.push(f.clone());
        }

        let indicators = compute_all(&estimated);
        let patterns = scan(&estimated);
        let regime = assess(&estimated, &indicators);

        let mut result = SignalResult::no_trade(
            session_id,
            symbol,
            timeframe,
            now_epoch,
            candle_close_time,
            closed.len(),
        );
        result.indicators = indicators.clone();
        result.psychology = patterns.psychology.clone();
        result.forming_candle = forming.cloned();

        // Regime gate.
        let hostile_volatility = regime.volatility_level == VolatilityLevel::High
            && regime.price_action != PriceAction::Clean;
        if regime.regime == Regime::Choppy || hostile_volatility {
            debug!(symbol, reason = %regime.reason, "regime gate refused signal");
            return result.with_override(format!("Market regime: {}", regime.reason));
        }

        // Volatility veto.
        if let Some(reason) = volatility::should_no_trade(&estimated) {
            return result.with_override(reason);
        }
        if let Some(threshold) = options.volatility_threshold {
            if let Some(analysis) = volatility::analyze(symbol, &estimated) {
                if analysis.volatility_score >= threshold {
                    return result.with_override(format!(
                        "Volatility score {:.2} above configured threshold {threshold:.2}",
                        analysis.volatility_score
                    ));
                }
            }
        }

        // ── 4. Indicator + pattern votes ────────────────────────────────
        let mut votes: Vec<Vote> = indicator_votes(&estimated, &indicators, options);
        votes.extend(patterns.votes.iter().cloned());

        // ── 5. Strategy heads ───────────────────────────────────────────
        votes.extend(strategy_votes(&estimated, &indicators, &patterns.psychology));

        // ── 6. ML fusion ────────────────────────────────────────────────
        let snapshot = features::extract(&estimated, &indicators, &patterns);
        let verdict = snapshot.as_ref().map(|s| self.ml.read().predict(s));
        result.features = snapshot;
        result.ml = verdict;

        if let Some(v) = &verdict {
            if v.direction.is_directional() {
                if let Some(reason) = self.thresholds.read().check(v.confidence) {
                    return result.with_override(format!("ML gate: {reason}"));
                }
                let weight = match v.tier {
                    Tier::Premium => 2.0,
                    Tier::Standard => 1.5,
                    Tier::Low => 1.0,
                };
                let direction = match v.direction {
                    Direction::Call => VoteDirection::Up,
                    Direction::Put => VoteDirection::Down,
                    Direction::NoTrade => VoteDirection::Neutral,
                };
                votes.push(Vote::new(
                    "ml_ensemble",
                    direction,
                    weight,
                    format!(
                        "{} ensemble verdict at {:.0}% ({})",
                        v.direction, v.confidence, v.tier
                    ),
                ));
            }
        }

        // ── Tally the full pool ─────────────────────────────────────────
        let t = tally(&votes);
        let regime_penalty = regime.confidence_penalty();
        let quality = quality_score(&t, regime_penalty);
        let base = base_confidence(&t, regime_penalty);

        result.votes = votes.clone();
        result.p_up = t.p_up;
        result.p_down = t.p_down;

        let candidate = t.dominant_direction();
        let suggested = if t.p_up >= 0.5 {
            Direction::Call
        } else {
            Direction::Put
        };

        if candidate == Direction::NoTrade {
            result.confidence = base;
            result.suggested_direction = Some(suggested);
            result.is_low_confidence = true;
            return result;
        }

        // Regime direction veto.
        if !regime.allows(candidate) {
            result.suggested_direction = Some(candidate);
            return result.with_override(format!(
                "Regime veto: {candidate} against {} at strength {:.2}",
                regime.regime, regime.strength
            ));
        }

        // ── 7. Validation ───────────────────────────────────────────────
        let gates = {
            let current = self.thresholds.read().current();
            ValidationGates {
                max_conflict_ratio: current.max_conflict_ratio,
                min_aligned_indicators: current.min_aligned_indicators,
            }
        };
        if let Err(reason) = brain::validate(
            &estimated,
            &indicators,
            &t,
            quality,
            &regime,
            candidate,
            &gates,
        ) {
            debug!(symbol, %reason, "validation rejected signal");
            result.confidence = base;
            result.suggested_direction = Some(candidate);
            result.is_low_confidence = true;
            return result;
        }

        // ── 8. Final confidence ─────────────────────────────────────────
        let divergence_supports = matches!(
            (candidate, brain::detect_divergence(&estimated)),
            (Direction::Call, DivergenceRead::Bullish)
                | (Direction::Put, DivergenceRead::Bearish)
        );
        let ml_agreement = match &verdict {
            Some(v) if v.direction == candidate && v.tier == Tier::Premium => {
                MlAgreement::AgreesPremium
            }
            Some(v) if v.direction == candidate => MlAgreement::Agrees,
            Some(v) if v.direction.is_directional() => MlAgreement::Disagrees,
            _ => MlAgreement::Absent,
        };

        let confidence =
            final_confidence(&t, quality, &regime, candidate, divergence_supports, ml_agreement);

        // ── 9. Emission gates (on the un-jittered value) ────────────────
        let min_confidence = self.thresholds.read().current().min_confidence;
        let strength = t.direction_strength();
        if confidence < min_confidence || strength < MIN_DIRECTION_STRENGTH {
            result.confidence = confidence;
            result.suggested_direction = Some(candidate);
            result.is_low_confidence = true;
            return result;
        }

        let displayed = self.vary_confidence(symbol, confidence, candle_close_time, now_epoch);

        result.direction = candidate;
        result.confidence = displayed;
        result.entry_price = forming
            .map(|f| f.close)
            .or_else(|| closed.last().map(|c| c.close));
        result
    }

    /// Cosmetic confidence variation: small deterministic noise, plus an
    /// anti-repeat push when the previous emission (within 5 minutes) would
    /// land within 2 points of the new one. Clamped to [0, 95].
    fn vary_confidence(
        &self,
        symbol: &str,
        confidence: f64,
        candle_close_time: i64,
        now_epoch: i64,
    ) -> f64 {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        candle_close_time.hash(&mut hasher);
        let mut rng = rand::rngs::StdRng::seed_from_u64(hasher.finish());

        let mut varied = confidence + rng.gen_range(-2.5..2.5);

        let mut variation = self.variation.write();
        if let Some(last) = variation.get(symbol) {
            if now_epoch - last.epoch <= VARIATION_WINDOW_SECS
                && (varied - last.value).abs() < 2.0
            {
                let push = rng.gen_range(2.0..4.0);
                varied = if varied >= last.value {
                    last.value + push
                } else {
                    last.value - push
                };
            }
        }

        let clamped = varied.round().clamp(0.0, 95.0);
        variation.insert(
            symbol.to_string(),
            LastConfidence {
                value: clamped,
                epoch: now_epoch,
            },
        );
        clamped
    }
}
