// =============================================================================
// Pattern Memory — discrete market-state signatures with decayed statistics
// =============================================================================
//
// Features are discretized into a 6-symbol signature:
//
//   [rsi zone, macd cross sign, trend sign, candle pattern class,
//    regime class, volume level]
//
// Each signature accumulates (wins, total), both decayed multiplicatively by
// 0.995 on every recorded outcome so stale market states fade. Signatures
// whose total drops below 0.1 are evicted. Decay is applied per update, not
// per wall-clock unit: a quiet market freezes the memory.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::features::RawFeatures;

const DECAY: f64 = 0.995;
const EVICT_BELOW: f64 = 0.1;
/// Minimum accumulated mass before a signature's statistics are trusted.
const MIN_TOTAL: f64 = 1.0;

/// Discrete market-state signature.
pub type Signature = [i8; 6];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct SignatureStats {
    wins: f64,
    total: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternMemory {
    stats: HashMap<String, SignatureStats>,
}

/// Discretize the raw feature record into its signature.
pub fn signature_of(raw: &RawFeatures) -> Signature {
    let rsi_zone = if raw.rsi < 30.0 {
        -1
    } else if raw.rsi > 70.0 {
        1
    } else {
        0
    };
    let macd_sign = raw.macd_cross as i8;
    let trend_sign = raw.trend_direction as i8;
    let pattern_class = if raw.bullish_pattern_score > raw.bearish_pattern_score + 0.1 {
        1
    } else if raw.bearish_pattern_score > raw.bullish_pattern_score + 0.1 {
        -1
    } else {
        0
    };
    let regime_class = if raw.is_trending {
        1
    } else if raw.is_ranging {
        -1
    } else {
        0
    };
    let volume_level = if raw.volume_ratio > 1.5 {
        1
    } else if raw.volume_ratio < 0.7 {
        -1
    } else {
        0
    };

    [
        rsi_zone,
        macd_sign,
        trend_sign,
        pattern_class,
        regime_class,
        volume_level,
    ]
}

fn key_of(sig: &Signature) -> String {
    sig.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl PatternMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// P(up) for the market state, 0.5 until the signature has enough mass.
    pub fn predict(&self, raw: &RawFeatures) -> f64 {
        let key = key_of(&signature_of(raw));
        match self.stats.get(&key) {
            Some(s) if s.total >= MIN_TOTAL => s.wins / s.total,
            _ => 0.5,
        }
    }

    /// Record an outcome for the market state; decays every signature and
    /// evicts the ones that have faded out.
    pub fn update(&mut self, raw: &RawFeatures, went_up: bool) {
        for s in self.stats.values_mut() {
            s.wins *= DECAY;
            s.total *= DECAY;
        }
        self.stats.retain(|_, s| s.total >= EVICT_BELOW);

        let key = key_of(&signature_of(raw));
        let entry = self.stats.entry(key).or_default();
        entry.total += 1.0;
        if went_up {
            entry.wins += 1.0;
        }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
