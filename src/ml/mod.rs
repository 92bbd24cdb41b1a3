// =============================================================================
// ML Ensemble — four online learners with calibrated blending
// =============================================================================
//
// Learners: online logistic regression, gradient-boosted stumps, kNN over
// recent samples, and a discrete pattern memory. Base blend weights are
// 0.30 / 0.30 / 0.20 / 0.20; when the pattern memory speaks with conviction
// (|p - 0.5| > 0.2) the blend shifts to 0.25 / 0.25 / 0.15 / 0.35.
//
// The blended probability is calibrated against decile buckets of realized
// outcomes before the verdict is derived. All state is snapshot-serializable
// and every update path is deterministic, so replaying an outcome sequence
// from a snapshot reproduces the exact final state.
// =============================================================================

pub mod boosting;
pub mod calibration;
pub mod features;
pub mod knn;
pub mod logistic;
pub mod pattern_memory;

pub use features::{FeatureSnapshot, RawFeatures, FEATURE_DIM};

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{Direction, Tier};

use boosting::BoostedStumps;
use calibration::Calibrator;
use knn::KnnModel;
use logistic::OnlineLogistic;
use pattern_memory::PatternMemory;

/// Rolling window of prediction correctness.
const ROLLING_WINDOW: usize = 50;

/// Directional strength below which the ensemble abstains.
const MIN_DIRECTION_STRENGTH: f64 = 0.15;

/// The ensemble's opinion for one feature snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MlVerdict {
    /// Calibrated P(up).
    pub probability: f64,
    /// Blended probability before calibration.
    pub raw_probability: f64,
    pub direction: Direction,
    /// 2 * |p - 0.5|, in [0, 1].
    pub direction_strength: f64,
    /// Confidence in [50, 92].
    pub confidence: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MlEnsemble {
    logistic: OnlineLogistic,
    boosting: BoostedStumps,
    knn: KnnModel,
    memory: PatternMemory,
    calibrator: Calibrator,
    rolling: VecDeque<bool>,
}

impl MlEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blended (uncalibrated) P(up).
    fn raw_predict(&self, snapshot: &FeatureSnapshot) -> f64 {
        let p_logistic = self.logistic.predict(&snapshot.vector);
        let p_boosting = self.boosting.predict(&snapshot.vector);
        let p_knn = self.knn.predict(&snapshot.vector);
        let p_memory = self.memory.predict(&snapshot.raw);

        let memory_conviction = (p_memory - 0.5).abs() > 0.2;
        let (w_log, w_boost, w_knn, w_mem) = if memory_conviction {
            (0.25, 0.25, 0.15, 0.35)
        } else {
            (0.30, 0.30, 0.20, 0.20)
        };

        w_log * p_logistic + w_boost * p_boosting + w_knn * p_knn + w_mem * p_memory
    }

    /// Full verdict for a feature snapshot.
    pub fn predict(&self, snapshot: &FeatureSnapshot) -> MlVerdict {
        let raw = self.raw_predict(snapshot);
        let probability = self.calibrator.calibrate(raw);
        let direction_strength = 2.0 * (probability - 0.5).abs();

        let direction = if direction_strength <= MIN_DIRECTION_STRENGTH {
            Direction::NoTrade
        } else if probability > 0.5 {
            Direction::Call
        } else {
            Direction::Put
        };

        let confidence = (50.0 + direction_strength * 42.0).round().clamp(50.0, 92.0);
        let tier = if confidence >= 82.0 {
            Tier::Premium
        } else if confidence >= 72.0 {
            Tier::Standard
        } else {
            Tier::Low
        };

        MlVerdict {
            probability,
            raw_probability: raw,
            direction,
            direction_strength,
            confidence,
            tier,
        }
    }

    /// Train every learner on a resolved outcome. `went_up` is the realized
    /// price direction at expiry, independent of what was predicted.
    pub fn update(&mut self, snapshot: &FeatureSnapshot, went_up: bool) {
        // Score the pre-update prediction for the rolling accuracy window.
        let raw = self.raw_predict(snapshot);
        let correct = (raw > 0.5) == went_up;
        self.rolling.push_back(correct);
        while self.rolling.len() > ROLLING_WINDOW {
            self.rolling.pop_front();
        }

        self.calibrator.record(raw, went_up);
        self.logistic.update(&snapshot.vector, went_up);
        self.boosting.update(&snapshot.vector, went_up);
        self.knn.update(&snapshot.vector, went_up);
        self.memory.update(&snapshot.raw, went_up);
    }

    /// Fraction of the last [`ROLLING_WINDOW`] predictions that matched the
    /// realized direction. 0.5 until anything has resolved.
    pub fn rolling_accuracy(&self) -> f64 {
        if self.rolling.is_empty() {
            return 0.5;
        }
        self.rolling.iter().filter(|&&c| c).count() as f64 / self.rolling.len() as f64
    }

    /// L2 norm of the logistic weights, for divergence monitoring.
    pub fn logistic_weight_norm(&self) -> f64 {
        self.logistic.weight_norm()
    }

    pub fn update_count(&self) -> u64 {
        self.logistic.update_count()
    }
}
