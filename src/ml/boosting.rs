// =============================================================================
// Gradient-Boosted Decision Stumps — periodic refit + online leaf nudge
// =============================================================================
//
// A small additive model over the feature vector:
//
//   p = clip(0.5 + sum(stump_k(x)), 0, 1)
//
// Up to 15 stumps. Every 10 new samples (once the buffer holds >= 30) the
// forest is refit greedily: each stump picks the (feature, threshold) split
// minimizing squared residual error over a seeded-random 10-feature subset,
// with at most 5 quantile thresholds tested per feature. Between refits each
// observed sample nudges the leaf it lands in by ±0.01 * error.
//
// The refit RNG is seeded from the fit counter so replaying an outcome
// sequence from a snapshot reproduces the exact same forest.
// =============================================================================

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::features::FEATURE_DIM;

const MAX_STUMPS: usize = 15;
const REFIT_EVERY: usize = 10;
const MIN_BUFFER: usize = 30;
const MAX_BUFFER: usize = 200;
const FEATURE_SUBSET: usize = 10;
const MAX_THRESHOLDS: usize = 5;
const NUDGE: f64 = 0.01;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Stump {
    feature_idx: usize,
    threshold: f64,
    left_value: f64,
    right_value: f64,
}

impl Stump {
    fn predict(&self, x: &[f64]) -> f64 {
        if x[self.feature_idx] <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sample {
    x: Vec<f64>,
    y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoostedStumps {
    stumps: Vec<Stump>,
    buffer: Vec<Sample>,
    samples_since_fit: usize,
    fits: u64,
}

impl BoostedStumps {
    pub fn new() -> Self {
        Self::default()
    }

    /// P(up) for the given feature vector.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let sum: f64 = self.stumps.iter().map(|s| s.predict(x)).sum();
        (0.5 + sum).clamp(0.0, 1.0)
    }

    /// Record one labelled sample; nudge the active leaves immediately and
    /// refit the forest on schedule.
    pub fn update(&mut self, x: &[f64], went_up: bool) {
        let y = if went_up { 1.0 } else { 0.0 };

        // Online correction between refits.
        let error = y - self.predict(x);
        for stump in &mut self.stumps {
            if x[stump.feature_idx] <= stump.threshold {
                stump.left_value += NUDGE * error;
            } else {
                stump.right_value += NUDGE * error;
            }
        }

        self.buffer.push(Sample { x: x.to_vec(), y });
        if self.buffer.len() > MAX_BUFFER {
            self.buffer.remove(0);
        }

        self.samples_since_fit += 1;
        if self.buffer.len() >= MIN_BUFFER && self.samples_since_fit >= REFIT_EVERY {
            self.refit();
            self.samples_since_fit = 0;
        }
    }

    pub fn stump_count(&self) -> usize {
        self.stumps.len()
    }

    /// Greedy residual fit. Deterministic for a given fit counter.
    fn refit(&mut self) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.fits);
        self.fits += 1;

        let mut residuals: Vec<f64> = self.buffer.iter().map(|s| s.y - 0.5).collect();
        let mut stumps = Vec::with_capacity(MAX_STUMPS);

        for _ in 0..MAX_STUMPS {
            let mut features: Vec<usize> = (0..FEATURE_DIM).collect();
            features.shuffle(&mut rng);
            features.truncate(FEATURE_SUBSET);

            let Some(stump) = self.best_stump(&features, &residuals) else {
                break;
            };

            for (sample, r) in self.buffer.iter().zip(residuals.iter_mut()) {
                *r -= stump.predict(&sample.x);
            }
            stumps.push(stump);
        }

        self.stumps = stumps;
    }

    /// The single best split over the candidate features for the current
    /// residuals, or `None` when no split reduces error.
    fn best_stump(&self, features: &[usize], residuals: &[f64]) -> Option<Stump> {
        let mut best: Option<(f64, Stump)> = None;

        for &feature_idx in features {
            let mut values: Vec<f64> =
                self.buffer.iter().map(|s| s.x[feature_idx]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            if values.len() < 2 {
                continue;
            }

            // Quantile thresholds between min and max.
            let steps = values.len().min(MAX_THRESHOLDS + 1);
            for q in 1..steps {
                let idx = q * (values.len() - 1) / steps;
                let threshold = (values[idx] + values[idx + 1]) / 2.0;

                let (mut left_sum, mut left_n, mut right_sum, mut right_n) =
                    (0.0, 0usize, 0.0, 0usize);
                for (sample, &r) in self.buffer.iter().zip(residuals.iter()) {
                    if sample.x[feature_idx] <= threshold {
                        left_sum += r;
                        left_n += 1;
                    } else {
                        right_sum += r;
                        right_n += 1;
                    }
                }
                if left_n == 0 || right_n == 0 {
                    continue;
                }

                let left_value = left_sum / left_n as f64;
                let right_value = right_sum / right_n as f64;

                let error: f64 = self
                    .buffer
                    .iter()
                    .zip(residuals.iter())
                    .map(|(sample, &r)| {
                        let pred = if sample.x[feature_idx] <= threshold {
                            left_value
                        } else {
                            right_value
                        };
                        (r - pred).powi(2)
                    })
                    .sum();

                let candidate = Stump {
                    feature_idx,
                    threshold,
                    // Shrink leaves so no single stump dominates the sum.
                    left_value: left_value * 0.3,
                    right_value: right_value * 0.3,
                };
                match &best {
                    Some((best_err, _)) if *best_err <= error => {}
                    _ => best = Some((error, candidate)),
                }
            }
        }

        best.map(|(_, stump)| stump)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn vector(direction: f64) -> Vec<f64> {
        let mut x = vec![0.0; FEATURE_DIM];
        x[0] = 0.7 * direction;
        x[10] = direction;
        x[26] = 0.5 * direction;
        x
    }

    #[test]
    fn untrained_predicts_half() {
        let model = BoostedStumps::new();
        assert_eq!(model.predict(&vector(1.0)), 0.5);
    }

    #[test]
    fn no_refit_below_min_buffer() {
        let mut model = BoostedStumps::new();
        for _ in 0..20 {
            model.update(&vector(1.0), true);
        }
        assert_eq!(model.stump_count(), 0);
    }

    #[test]
    fn refit_builds_stumps_and_separates() {
        let mut model = BoostedStumps::new();
        for i in 0..60 {
            let up = i % 2 == 0;
            model.update(&vector(if up { 1.0 } else { -1.0 }), up);
        }
        assert!(model.stump_count() > 0);
        assert!(model.predict(&vector(1.0)) > 0.6);
        assert!(model.predict(&vector(-1.0)) < 0.4);
    }

    #[test]
    fn prediction_clipped_to_unit_interval() {
        let mut model = BoostedStumps::new();
        for _ in 0..100 {
            model.update(&vector(1.0), true);
        }
        let p = model.predict(&vector(1.0));
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn replay_reproduces_forest() {
        let run = || {
            let mut model = BoostedStumps::new();
            for i in 0..80 {
                let up = (i * 7) % 3 != 0;
                model.update(&vector(if up { 1.0 } else { -1.0 }), up);
            }
            model
        };
        let a = run();
        let b = run();
        assert_eq!(a.stump_count(), b.stump_count());
        assert_eq!(a.predict(&vector(1.0)), b.predict(&vector(1.0)));
        assert_eq!(a.predict(&vector(-1.0)), b.predict(&vector(-1.0)));
    }
}
