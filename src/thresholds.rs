// =============================================================================
// Adaptive Thresholds — win-rate-driven signal admission gates
// =============================================================================
//
// Process-wide state observing the win/loss stream. A base gate set is
// tightened when recent performance degrades and relaxed back toward base
// when it recovers:
//
//   tighten    — recent-15 win rate < 0.65
//   relax      — recent-15 win rate > 0.80 with >= 15 samples
//   emergency  — current loss streak >= 3
//
// Adjustments require >= 10 samples and a 5-minute cooldown. The sliding
// window holds at most 30 outcomes; entries older than 2 hours are pruned.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Window and timing limits.
const MAX_WINDOW: usize = 30;
const MAX_AGE_SECS: i64 = 2 * 3600;
const COOLDOWN_SECS: i64 = 5 * 60;
const MIN_SAMPLES_FOR_ADJUST: usize = 10;

/// The gate values the signal engine checks against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub min_confidence: f64,
    pub max_conflict_ratio: f64,
    pub min_trend_strength: f64,
    pub min_aligned_indicators: u32,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            min_confidence: 72.0,
            max_conflict_ratio: 0.32,
            min_trend_strength: 0.42,
            min_aligned_indicators: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct OutcomeRecord {
    won: bool,
    confidence: f64,
    epoch: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveThresholds {
    base: ThresholdSet,
    current: ThresholdSet,
    window: VecDeque<OutcomeRecord>,
    loss_streak: u32,
    last_adjust_epoch: Option<i64>,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            base: ThresholdSet::default(),
            current: ThresholdSet::default(),
            window: VecDeque::new(),
            loss_streak: 0,
            last_adjust_epoch: None,
        }
    }
}

impl AdaptiveThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gates currently in force.
    pub fn current(&self) -> ThresholdSet {
        self.current
    }

    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    /// Win rate over the newest `n` window entries, if any exist.
    fn recent_win_rate(&self, n: usize) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let take = self.window.len().min(n);
        let wins = self
            .window
            .iter()
            .rev()
            .take(take)
            .filter(|r| r.won)
            .count();
        Some(wins as f64 / take as f64)
    }

    /// Record one resolved signal and re-evaluate the gates.
    pub fn record_outcome(&mut self, won: bool, confidence: f64, now_epoch: i64) {
        self.window.push_back(OutcomeRecord {
            won,
            confidence,
            epoch: now_epoch,
        });
        while self.window.len() > MAX_WINDOW {
            self.window.pop_front();
        }
        self.window
            .retain(|r| now_epoch - r.epoch <= MAX_AGE_SECS);

        self.loss_streak = if won { 0 } else { self.loss_streak + 1 };

        self.maybe_adjust(now_epoch);
    }

    fn maybe_adjust(&mut self, now_epoch: i64) {
        if self.window.len() < MIN_SAMPLES_FOR_ADJUST {
            return;
        }
        if let Some(last) = self.last_adjust_epoch {
            if now_epoch - last < COOLDOWN_SECS {
                return;
            }
        }

        let recent15 = match self.recent_win_rate(15) {
            Some(rate) => rate,
            None => return,
        };

        let before = self.current;

        if self.loss_streak >= 3 {
            // Emergency brake overrides the gradual rules.
            self.current.min_confidence = (self.current.min_confidence + 3.0).min(88.0);
            self.current.min_aligned_indicators =
                (self.current.min_aligned_indicators + 1).min(7);
        } else if recent15 < 0.65 {
            self.current.min_confidence = (self.current.min_confidence + 2.0).min(85.0);
            self.current.max_conflict_ratio =
                (self.current.max_conflict_ratio - 0.02).max(0.20);
            self.current.min_trend_strength =
                (self.current.min_trend_strength + 0.03).min(0.55);
            self.current.min_aligned_indicators =
                (self.current.min_aligned_indicators + 1).min(6);
        } else if recent15 > 0.80 && self.window.len() >= 15 {
            self.current.min_confidence =
                (self.current.min_confidence - 1.0).max(self.base.min_confidence);
            self.current.max_conflict_ratio =
                (self.current.max_conflict_ratio + 0.01).min(self.base.max_conflict_ratio);
            self.current.min_trend_strength =
                (self.current.min_trend_strength - 0.01).max(self.base.min_trend_strength);
            self.current.min_aligned_indicators = self
                .current
                .min_aligned_indicators
                .saturating_sub(1)
                .max(self.base.min_aligned_indicators);
        } else {
            return;
        }

        if self.current != before {
            self.last_adjust_epoch = Some(now_epoch);
            info!(
                min_confidence = self.current.min_confidence,
                max_conflict = self.current.max_conflict_ratio,
                min_trend = self.current.min_trend_strength,
                min_aligned = self.current.min_aligned_indicators,
                win_rate_15 = format!("{recent15:.2}"),
                loss_streak = self.loss_streak,
                "thresholds adjusted"
            );
        }
    }

    /// Admission check for a candidate signal. `None` means allowed;
    /// `Some(reason)` explains the denial.
    pub fn check(&self, confidence: f64) -> Option<String> {
        if self.loss_streak >= 4 {
            let required = (self.current.min_confidence + 5.0).min(90.0);
            if confidence < required {
                return Some(format!(
                    "losing streak {}: need confidence >= {required:.0}, have {confidence:.0}",
                    self.loss_streak
                ));
            }
        }

        if self.window.len() >= 10 {
            if let Some(rate) = self.recent_win_rate(10) {
                if rate < 0.50 {
                    return Some(format!(
                        "recent win rate {:.0}% below 50%",
                        rate * 100.0
                    ));
                }
            }
        }

        if confidence < self.current.min_confidence {
            return Some(format!(
                "confidence {confidence:.0} below gate {:.0}",
                self.current.min_confidence
            ));
        }

        debug!(confidence, "signal admitted by thresholds");
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn feed(
        thresholds: &mut AdaptiveThresholds,
        outcomes: &[bool],
        start_epoch: i64,
        spacing: i64,
    ) -> i64 {
        let mut epoch = start_epoch;
        for &won in outcomes {
            thresholds.record_outcome(won, 80.0, epoch);
            epoch += spacing;
        }
        epoch
    }

    #[test]
    fn defaults_match_base_gates() {
        let t = AdaptiveThresholds::new();
        let c = t.current();
        assert_eq!(c.min_confidence, 72.0);
        assert_eq!(c.max_conflict_ratio, 0.32);
        assert_eq!(c.min_trend_strength, 0.42);
        assert_eq!(c.min_aligned_indicators, 4);
    }

    #[test]
    fn no_adjustment_below_ten_samples() {
        let mut t = AdaptiveThresholds::new();
        feed(&mut t, &[false; 9], 1_000, 400);
        assert_eq!(t.current(), ThresholdSet::default());
    }

    #[test]
    fn poor_win_rate_tightens() {
        let mut t = AdaptiveThresholds::new();
        // Alternate so no 3-loss streak forms; 50% win rate < 0.65.
        let outcomes: Vec<bool> = (0..12).map(|i| i % 2 == 0).collect();
        feed(&mut t, &outcomes, 1_000, 400);
        let c = t.current();
        assert!(c.min_confidence > 72.0);
        assert!(c.max_conflict_ratio < 0.32);
        assert!(c.min_trend_strength > 0.42);
        assert!(c.min_aligned_indicators > 4);
    }

    #[test]
    fn cooldown_limits_adjustment_frequency() {
        let mut t = AdaptiveThresholds::new();
        // 12 outcomes spaced 1 s apart: at most one adjustment fires.
        let outcomes: Vec<bool> = (0..12).map(|i| i % 2 == 0).collect();
        feed(&mut t, &outcomes, 1_000, 1);
        assert!(t.current().min_confidence <= 74.0);
    }

    #[test]
    fn emergency_tighten_on_loss_streak() {
        let mut t = AdaptiveThresholds::new();
        let mut outcomes = vec![true; 9];
        outcomes.extend_from_slice(&[false, false, false]);
        feed(&mut t, &outcomes, 1_000, 400);
        let c = t.current();
        assert!(c.min_confidence >= 75.0);
        assert!(c.min_aligned_indicators >= 5);
    }

    #[test]
    fn strong_run_relaxes_back_toward_base() {
        let mut t = AdaptiveThresholds::new();
        // First tighten.
        let poor: Vec<bool> = (0..12).map(|i| i % 2 == 0).collect();
        let epoch = feed(&mut t, &poor, 1_000, 400);
        let tightened = t.current().min_confidence;
        assert!(tightened > 72.0);

        // Then a hot streak relaxes — never below base.
        feed(&mut t, &[true; 30], epoch, 400);
        let relaxed = t.current().min_confidence;
        assert!(relaxed < tightened);
        assert!(relaxed >= 72.0);
    }

    #[test]
    fn caps_and_floors_hold() {
        let mut t = AdaptiveThresholds::new();
        // Sustained losing alternation far past every cap.
        let outcomes: Vec<bool> = (0..200).map(|i| i % 2 == 0).collect();
        feed(&mut t, &outcomes, 1_000, 400);
        let c = t.current();
        assert!(c.min_confidence <= 88.0);
        assert!(c.max_conflict_ratio >= 0.20);
        assert!(c.min_trend_strength <= 0.55);
        assert!(c.min_aligned_indicators <= 7);
    }

    #[test]
    fn admission_denies_below_gate() {
        let t = AdaptiveThresholds::new();
        assert!(t.check(71.0).is_some());
        assert!(t.check(72.0).is_none());
    }

    #[test]
    fn admission_denies_on_long_loss_streak() {
        let mut t = AdaptiveThresholds::new();
        feed(&mut t, &[false; 4], 1_000, 10);
        // Streak of 4: gate-passing confidence is denied below gate + 5,
        // allowed at it (too few samples for the win-rate denial).
        let gate = t.current().min_confidence;
        assert!(t.check(gate + 1.0).is_some());
        assert!(t.check(gate + 5.0).is_none());
    }

    #[test]
    fn admission_denies_on_poor_recent_rate() {
        let mut t = AdaptiveThresholds::new();
        let outcomes: Vec<bool> = (0..12).map(|i| i % 3 == 0).collect();
        feed(&mut t, &outcomes, 1_000, 10);
        let denial = t.check(95.0);
        assert!(denial.is_some());
        assert!(denial.unwrap().contains("win rate"));
    }

    #[test]
    fn stale_entries_pruned() {
        let mut t = AdaptiveThresholds::new();
        feed(&mut t, &[false; 5], 1_000, 10);
        // Two hours later the old losses are gone from the window.
        t.record_outcome(true, 80.0, 1_000 + MAX_AGE_SECS + 100);
        assert_eq!(t.recent_win_rate(30), Some(1.0));
    }
}
