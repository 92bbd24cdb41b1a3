// =============================================================================
// Online Logistic Regression — SGD with decaying rate and L2 penalty
// =============================================================================
//
//   p          = sigmoid(w . x + b),  logit clipped to [-500, 500]
//   lr_n       = alpha / (1 + n * 1e-4)
//   w_i       += lr * ((y - p) * x_i - lambda * w_i)
//
// The L2 term keeps the weight norm bounded under long one-sided outcome
// streaks.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::features::FEATURE_DIM;

const BASE_LEARNING_RATE: f64 = 0.05;
const LR_DECAY: f64 = 1e-4;
const L2_LAMBDA: f64 = 1e-3;
const LOGIT_CLIP: f64 = 500.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineLogistic {
    weights: Vec<f64>,
    bias: f64,
    updates: u64,
}

impl Default for OnlineLogistic {
    fn default() -> Self {
        Self {
            weights: vec![0.0; FEATURE_DIM],
            bias: 0.0,
            updates: 0,
        }
    }
}

impl OnlineLogistic {
    pub fn new() -> Self {
        Self::default()
    }

    /// P(up) for the given feature vector.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let logit: f64 = self
            .weights
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.bias;
        sigmoid(logit.clamp(-LOGIT_CLIP, LOGIT_CLIP))
    }

    /// One SGD step toward the observed label (`true` = price went up).
    pub fn update(&mut self, x: &[f64], went_up: bool) {
        let y = if went_up { 1.0 } else { 0.0 };
        let p = self.predict(x);
        let error = y - p;
        let lr = BASE_LEARNING_RATE / (1.0 + self.updates as f64 * LR_DECAY);

        for (w, &v) in self.weights.iter_mut().zip(x.iter()) {
            *w += lr * (error * v - L2_LAMBDA * *w);
        }
        self.bias += lr * error;
        self.updates += 1;
    }

    /// L2 norm of the weight vector, exposed for divergence checks.
    pub fn weight_norm(&self) -> f64 {
        self.weights.iter().map(|w| w * w).sum::<f64>().sqrt()
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn up_vector() -> Vec<f64> {
        let mut x = vec![0.0; FEATURE_DIM];
        x[0] = 0.8; // price change
        x[10] = 1.0; // trend direction
        x[24] = 0.9; // buy pressure
        x
    }

    fn down_vector() -> Vec<f64> {
        let mut x = vec![0.0; FEATURE_DIM];
        x[0] = -0.8;
        x[10] = -1.0;
        x[25] = 0.9; // sell pressure
        x
    }

    #[test]
    fn untrained_model_is_neutral() {
        let model = OnlineLogistic::new();
        assert!((model.predict(&up_vector()) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn learns_to_separate_directions() {
        let mut model = OnlineLogistic::new();
        for _ in 0..200 {
            model.update(&up_vector(), true);
            model.update(&down_vector(), false);
        }
        assert!(model.predict(&up_vector()) > 0.7);
        assert!(model.predict(&down_vector()) < 0.3);
    }

    #[test]
    fn weight_norm_stays_bounded() {
        let mut model = OnlineLogistic::new();
        // A long one-sided streak must not blow the weights up.
        for _ in 0..5000 {
            model.update(&up_vector(), true);
        }
        assert!(
            model.weight_norm() < 50.0,
            "norm diverged: {}",
            model.weight_norm()
        );
        assert_eq!(model.update_count(), 5000);
    }

    #[test]
    fn prediction_is_valid_probability() {
        let mut model = OnlineLogistic::new();
        for i in 0..100 {
            model.update(&up_vector(), i % 3 != 0);
        }
        let p = model.predict(&up_vector());
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn replay_reproduces_state() {
        let run = || {
            let mut model = OnlineLogistic::new();
            for i in 0..50 {
                model.update(&up_vector(), i % 2 == 0);
            }
            model
        };
        let a = run();
        let b = run();
        assert_eq!(a.weight_norm(), b.weight_norm());
        assert_eq!(a.predict(&up_vector()), b.predict(&up_vector()));
    }
}
