// =============================================================================
// Volatility Service — market-condition scoring and the hard no-trade veto
// =============================================================================
//
// A pure scorer over the last 15 candles plus a process-wide cache of the
// latest per-symbol analyses (feeding the HTTP API and the in-session
// warning loop).
//
// Components folded into the score:
//   - ATR / price ratio (tiered 0.15 / 0.35 / 0.50)
//   - wick dominance    (tiered 0.10 / 0.25 / 0.40)
//   - mean bar range    (tiered 0.20 / 0.35)
//   - price spikes and oversized wicks (proportional bonuses)
//   - low price stability (+0.15)
//
// `is_volatile` at score >= 0.4. `should_no_trade` is the stricter veto and
// returns a human-readable reason for the NO_TRADE override.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::indicators::atr::atr_ratio;
use crate::market_data::Candle;

/// Candles inspected by the scorer.
const WINDOW: usize = 15;

/// Scores at or above this are volatile.
pub const VOLATILE_SCORE: f64 = 0.4;

// ATR-ratio tiers.
const ATR_ELEVATED: f64 = 0.003;
const ATR_HIGH: f64 = 0.006;
const ATR_EXTREME: f64 = 0.012;

// Wick-ratio tiers.
const WICK_ELEVATED: f64 = 0.45;
const WICK_HIGH: f64 = 0.60;
const WICK_EXTREME: f64 = 0.75;

// Mean-range tiers.
const RANGE_ELEVATED: f64 = 0.004;
const RANGE_HIGH: f64 = 0.008;

/// Full analysis for one symbol window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityAnalysis {
    pub symbol: String,
    /// Sum of wicks over sum of wicks + bodies across the window.
    pub wick_ratio: f64,
    /// ATR(14) / last close.
    pub atr_ratio: f64,
    /// Mean of (high - low) / low across the window.
    pub range_ratio: f64,
    /// Last-10 candles with wick > 1.5x body or range > 2.5x average.
    pub large_wick_count: usize,
    /// Last-5 ranges exceeding 3x the prior-10 mean.
    pub spike_count: usize,
    /// Smoothness of price movement in [0, 1]; higher is steadier.
    pub price_stability: f64,
    pub volatility_score: f64,
    pub is_volatile: bool,
}

impl VolatilityAnalysis {
    /// A market is "stable" when it is not flagged volatile.
    pub fn is_stable(&self) -> bool {
        !self.is_volatile
    }

    /// Coarse label for API payloads.
    pub fn severity(&self) -> &'static str {
        if self.volatility_score >= 0.7 {
            "extreme"
        } else if self.volatility_score >= VOLATILE_SCORE {
            "high"
        } else if self.volatility_score >= 0.25 {
            "moderate"
        } else {
            "low"
        }
    }
}

/// Analyze the last [`WINDOW`] candles. `None` below the minimum history.
pub fn analyze(symbol: &str, candles: &[Candle]) -> Option<VolatilityAnalysis> {
    if candles.len() < WINDOW {
        return None;
    }
    let window = &candles[candles.len() - WINDOW..];

    // Wick dominance across the window.
    let (wick_sum, body_sum) = window.iter().fold((0.0, 0.0), |(w, b), c| {
        (w + c.upper_wick() + c.lower_wick(), b + c.body())
    });
    let wick_ratio = if wick_sum + body_sum > 0.0 {
        wick_sum / (wick_sum + body_sum)
    } else {
        0.0
    };

    let atr = atr_ratio(candles, 14).unwrap_or(0.0);

    let range_ratio = window
        .iter()
        .filter(|c| c.low > 0.0)
        .map(|c| (c.high - c.low) / c.low)
        .sum::<f64>()
        / WINDOW as f64;

    // Oversized wicks over the last 10.
    let avg_range = window.iter().map(Candle::range).sum::<f64>() / WINDOW as f64;
    let large_wick_count = window[WINDOW - 10..]
        .iter()
        .filter(|c| {
            let wick = c.upper_wick().max(c.lower_wick());
            wick > 1.5 * c.body() && c.body() > 0.0 || c.range() > 2.5 * avg_range
        })
        .count();

    // Price spikes: last-5 ranges vs the prior-10 mean.
    let prior_mean = window[..10].iter().map(Candle::range).sum::<f64>() / 10.0;
    let spike_count = if prior_mean > 0.0 {
        window[10..]
            .iter()
            .filter(|c| c.range() > 3.0 * prior_mean)
            .count()
    } else {
        0
    };

    let price_stability = stability(window);

    let mut score = 0.0;
    score += tier(atr, ATR_ELEVATED, ATR_HIGH, ATR_EXTREME, 0.15, 0.35, 0.50);
    score += tier(
        wick_ratio,
        WICK_ELEVATED,
        WICK_HIGH,
        WICK_EXTREME,
        0.10,
        0.25,
        0.40,
    );
    if range_ratio >= RANGE_HIGH {
        score += 0.35;
    } else if range_ratio >= RANGE_ELEVATED {
        score += 0.20;
    }
    score += spike_count as f64 * 0.05;
    score += large_wick_count as f64 * 0.03;
    if price_stability < 0.4 {
        score += 0.15;
    }
    let volatility_score = score.clamp(0.0, 1.0);

    Some(VolatilityAnalysis {
        symbol: symbol.to_string(),
        wick_ratio,
        atr_ratio: atr,
        range_ratio,
        large_wick_count,
        spike_count,
        price_stability,
        volatility_score,
        is_volatile: volatility_score >= VOLATILE_SCORE,
    })
}

/// Three-tier contribution helper.
fn tier(value: f64, t1: f64, t2: f64, t3: f64, w1: f64, w2: f64, w3: f64) -> f64 {
    if value >= t3 {
        w3
    } else if value >= t2 {
        w2
    } else if value >= t1 {
        w1
    } else {
        0.0
    }
}

/// Stability from close-to-close direction changes and the longest
/// same-direction run.
fn stability(window: &[Candle]) -> f64 {
    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    if closes.len() < 3 {
        return 1.0;
    }

    let mut changes = 0usize;
    let mut longest_run = 1usize;
    let mut run = 1usize;
    let mut prev_dir = 0i8;

    for w in closes.windows(2) {
        let dir = if w[1] > w[0] {
            1
        } else if w[1] < w[0] {
            -1
        } else {
            0
        };
        if dir != 0 && prev_dir != 0 && dir != prev_dir {
            changes += 1;
            run = 1;
        } else if dir != 0 && dir == prev_dir {
            run += 1;
            longest_run = longest_run.max(run);
        }
        if dir != 0 {
            prev_dir = dir;
        }
    }

    let change_ratio = changes as f64 / (closes.len() - 2) as f64;
    let run_score = (longest_run as f64 / 5.0).min(1.0);
    (0.6 * (1.0 - change_ratio) + 0.4 * run_score).clamp(0.0, 1.0)
}

/// Strict veto. `Some(reason)` forces NO_TRADE with a volatility override.
pub fn should_no_trade(candles: &[Candle]) -> Option<String> {
    let analysis = analyze("", candles)?;

    if analysis.atr_ratio >= ATR_EXTREME {
        return Some(format!(
            "Extreme volatility: ATR {:.2}% of price",
            analysis.atr_ratio * 100.0
        ));
    }
    if analysis.atr_ratio >= ATR_HIGH && analysis.spike_count >= 3 {
        return Some(format!(
            "Price spikes under high ATR: {} spikes in the last 5 candles",
            analysis.spike_count
        ));
    }
    if analysis.wick_ratio >= WICK_EXTREME && analysis.large_wick_count >= 4 {
        return Some(format!(
            "Extreme volatility: wick dominance {:.0}% with {} oversized wicks",
            analysis.wick_ratio * 100.0,
            analysis.large_wick_count
        ));
    }
    if analysis.spike_count >= 4 && analysis.price_stability < 0.25 {
        return Some(format!(
            "Price spikes in unstable market: {} spikes, stability {:.2}",
            analysis.spike_count, analysis.price_stability
        ));
    }
    if analysis.price_stability < 0.2
        && analysis.large_wick_count >= 5
        && analysis.atr_ratio >= ATR_HIGH
    {
        return Some("Extreme volatility: unstable market with heavy wicks".to_string());
    }

    None
}

// =============================================================================
// Volatility cache — latest analysis per symbol
// =============================================================================

#[derive(Default)]
pub struct VolatilityCache {
    analyses: RwLock<HashMap<String, VolatilityAnalysis>>,
    last_update_epoch: RwLock<Option<i64>>,
}

impl VolatilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, analysis: VolatilityAnalysis) {
        self.analyses
            .write()
            .insert(analysis.symbol.clone(), analysis);
        *self.last_update_epoch.write() = Some(chrono::Utc::now().timestamp());
    }

    /// Epoch of the most recent cache write, if any.
    pub fn last_update(&self) -> Option<i64> {
        *self.last_update_epoch.read()
    }

    pub fn get(&self, symbol: &str) -> Option<VolatilityAnalysis> {
        self.analyses.read().get(symbol).cloned()
    }

    pub fn all(&self) -> Vec<VolatilityAnalysis> {
        let mut list: Vec<VolatilityAnalysis> =
            self.analyses.read().values().cloned().collect();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }
}
