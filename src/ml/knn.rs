// =============================================================================
// k-Nearest Neighbours — inverse-distance weighted vote over recent samples
// =============================================================================
//
// A ring buffer of the last 150 normalized feature vectors with their binary
// labels. Prediction takes the k = 7 nearest by Euclidean distance and
// blends their labels weighted by 1 / (distance + eps). An exact match
// dominates the vote, which is the desired behaviour.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const K: usize = 7;
const CAPACITY: usize = 150;
const DISTANCE_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Neighbor {
    x: Vec<f64>,
    went_up: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnnModel {
    samples: VecDeque<Neighbor>,
}

impl KnnModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// P(up) from the k nearest stored samples; 0.5 when the buffer holds
    /// fewer than k entries.
    pub fn predict(&self, x: &[f64]) -> f64 {
        if self.samples.len() < K {
            return 0.5;
        }

        let mut distances: Vec<(f64, bool)> = self
            .samples
            .iter()
            .map(|n| (euclidean(&n.x, x), n.went_up))
            .collect();
        distances
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut up_weight = 0.0;
        let mut total_weight = 0.0;
        for &(dist, went_up) in distances.iter().take(K) {
            let w = 1.0 / (dist + DISTANCE_EPS);
            if went_up {
                up_weight += w;
            }
            total_weight += w;
        }

        if total_weight <= 0.0 {
            0.5
        } else {
            up_weight / total_weight
        }
    }

    /// Append a labelled sample, evicting the oldest past capacity.
    pub fn update(&mut self, x: &[f64], went_up: bool) {
        self.samples.push_back(Neighbor {
            x: x.to_vec(),
            went_up,
        });
        while self.samples.len() > CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
