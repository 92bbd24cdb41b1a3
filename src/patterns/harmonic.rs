// =============================================================================
// Harmonic Patterns — Fibonacci-ratio XABCD structures
// =============================================================================
//
// Works on candle midpoints over the last 30–45 bars. A zigzag of alternating
// swing points is extracted; the last five (X, A, B, C, D) are tested against
// each pattern's ratio template:
//
//   Gartley    — AB = 61.8 % of XA, AD = 78.6 % of XA
//   Butterfly  — AB = 78.6 % of XA, AD = 127.2 % / 161.8 % of XA
//   Bat        — AB = 38.2–50 % of XA, AD = 88.6 % of XA
//   Crab       — AD = 161.8 % of XA
//   Cypher     — CD = 78.6 % of XC
//
// Ratio tolerance is pattern-specific, between 3 % and 8 %. A pattern whose
// final leg points down is a bullish reversal setup (and vice versa).
// =============================================================================

use crate::market_data::Candle;
use crate::types::{Vote, VoteDirection};

const MIN_WINDOW: usize = 30;
const MAX_WINDOW: usize = 45;

#[derive(Debug, Clone, Copy)]
struct Pivot {
    price: f64,
    is_high: bool,
}

/// Run harmonic detection over the window (oldest first).
pub fn detect(candles: &[Candle]) -> Vec<Vote> {
    if candles.len() < MIN_WINDOW {
        return Vec::new();
    }
    let window = &candles[candles.len().saturating_sub(MAX_WINDOW)..];
    let mids: Vec<f64> = window.iter().map(|c| c.midpoint()).collect();

    let pivots = zigzag(&mids);
    if pivots.len() < 5 {
        return Vec::new();
    }
    let xabcd = &pivots[pivots.len() - 5..];

    match_patterns(xabcd)
}

/// Alternating swing pivots over the midpoint series, two-bar confirmation.
/// Consecutive same-side pivots keep only the more extreme one.
fn zigzag(mids: &[f64]) -> Vec<Pivot> {
    let mut pivots: Vec<Pivot> = Vec::new();
    if mids.len() < 5 {
        return pivots;
    }

    for i in 2..mids.len() - 2 {
        let v = mids[i];
        let is_high =
            v > mids[i - 1] && v > mids[i - 2] && v > mids[i + 1] && v > mids[i + 2];
        let is_low =
            v < mids[i - 1] && v < mids[i - 2] && v < mids[i + 1] && v < mids[i + 2];
        if !is_high && !is_low {
            continue;
        }

        match pivots.last() {
            Some(last) if last.is_high == is_high => {
                // Same side twice: keep the more extreme pivot.
                let more_extreme = if is_high {
                    v > last.price
                } else {
                    v < last.price
                };
                if more_extreme {
                    pivots.pop();
                    pivots.push(Pivot { price: v, is_high });
                }
            }
            _ => pivots.push(Pivot { price: v, is_high }),
        }
    }

    pivots
}

/// Test the XABCD pivot chain against each harmonic template.
fn match_patterns(p: &[Pivot]) -> Vec<Vote> {
    let (x, a, b, c, d) = (p[0].price, p[1].price, p[2].price, p[3].price, p[4].price);

    let xa = (a - x).abs();
    let xc = (c - x).abs();
    if xa <= 0.0 {
        return Vec::new();
    }

    let ab_xa = (b - a).abs() / xa;
    let ad_xa = (d - a).abs() / xa;
    let cd_xc = if xc > 0.0 { (d - c).abs() / xc } else { f64::MAX };

    // The final leg's direction decides which way the reversal points.
    let direction = if d < c {
        VoteDirection::Up
    } else {
        VoteDirection::Down
    };

    let near = |value: f64, target: f64, tol: f64| (value - target).abs() <= tol;
    let quality = |value: f64, target: f64, tol: f64| 1.0 - (value - target).abs() / tol;

    let mut votes = Vec::new();

    // Gartley: AB 0.618, AD 0.786.
    if near(ab_xa, 0.618, 0.05) && near(ad_xa, 0.786, 0.05) {
        let q = (quality(ab_xa, 0.618, 0.05) + quality(ad_xa, 0.786, 0.05)) / 2.0;
        votes.push(harmonic_vote("gartley", direction, q));
    }
    // Butterfly: AB 0.786, AD extends to 1.272 or 1.618.
    if near(ab_xa, 0.786, 0.05) && (near(ad_xa, 1.272, 0.08) || near(ad_xa, 1.618, 0.08)) {
        let ext_q = quality(ad_xa, 1.272, 0.08).max(quality(ad_xa, 1.618, 0.08));
        let q = (quality(ab_xa, 0.786, 0.05) + ext_q) / 2.0;
        votes.push(harmonic_vote("butterfly", direction, q));
    }
    // Bat: shallow AB, deep AD at 0.886.
    if (0.332..=0.55).contains(&ab_xa) && near(ad_xa, 0.886, 0.04) {
        votes.push(harmonic_vote("bat", direction, quality(ad_xa, 0.886, 0.04)));
    }
    // Crab: extreme AD extension at 1.618.
    if (0.332..=0.668).contains(&ab_xa) && near(ad_xa, 1.618, 0.08) {
        votes.push(harmonic_vote("crab", direction, quality(ad_xa, 1.618, 0.08)));
    }
    // Cypher: CD at 0.786 of XC.
    if cd_xc != f64::MAX && near(cd_xc, 0.786, 0.05) && (1.13..=1.50).contains(&(xc / xa)) {
        votes.push(harmonic_vote("cypher", direction, quality(cd_xc, 0.786, 0.05)));
    }

    votes
}

fn harmonic_vote(name: &str, direction: VoteDirection, quality: f64) -> Vote {
    let weight = (0.9 + quality.clamp(0.0, 1.0)).clamp(0.5, 2.5);
    Vote::new(
        name,
        direction,
        weight,
        format!("{name} completion at harmonic ratio"),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(mid: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: mid,
            high: mid + 0.01,
            low: mid - 0.01,
            close: mid,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    /// Build a candle path that visits the given waypoints with linear legs.
    fn path(waypoints: &[f64], leg: usize) -> Vec<Candle> {
        let mut mids = Vec::new();
        for w in waypoints.windows(2) {
            for s in 0..leg {
                let t = s as f64 / leg as f64;
                mids.push(w[0] + (w[1] - w[0]) * t);
            }
        }
        mids.push(*waypoints.last().unwrap());
        mids.into_iter().map(candle).collect()
    }

    #[test]
    fn short_window_is_empty() {
        let candles = path(&[100.0, 105.0], 10);
        assert!(detect(&candles).is_empty());
    }

    #[test]
    fn gartley_ratios_match() {
        // X=100, A=110 (XA=10), B=103.82 (0.618), C=107.0, D=102.14 (0.786).
        // The leading leg down into X makes it a confirmed pivot.
        let candles = path(&[104.0, 100.0, 110.0, 103.82, 107.0, 102.14, 102.5], 7);
        let votes = detect(&candles);
        assert!(
            votes.iter().any(|v| v.indicator == "gartley"),
            "votes: {votes:?}"
        );
        let v = votes.iter().find(|v| v.indicator == "gartley").unwrap();
        // D below C: bullish completion.
        assert_eq!(v.direction, VoteDirection::Up);
        assert!((0.5..=2.5).contains(&v.weight));
    }

    #[test]
    fn crab_extension_matches() {
        // X=100, A=110, B=105 (0.5), C=108, D extends 1.618 of XA below A:
        // |D - A| = 1.618 * 10 => D = 110 - 16.18 = 93.82.
        let candles = path(&[104.0, 100.0, 110.0, 105.0, 108.0, 93.82, 94.2], 7);
        let votes = detect(&candles);
        assert!(
            votes.iter().any(|v| v.indicator == "crab"),
            "votes: {votes:?}"
        );
    }

    #[test]
    fn bearish_direction_when_final_leg_up() {
        // Mirror image of the Gartley: X high, final leg rising into D.
        let candles = path(&[106.0, 110.0, 100.0, 106.18, 103.0, 107.86, 107.5], 7);
        let votes = detect(&candles);
        if let Some(v) = votes.iter().find(|v| v.indicator == "gartley") {
            assert_eq!(v.direction, VoteDirection::Down);
        }
    }

    #[test]
    fn random_walk_rarely_matches() {
        // A structureless drift should not produce harmonic votes.
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(100.0 + i as f64 * 0.05))
            .collect();
        assert!(detect(&candles).is_empty());
    }

    #[test]
    fn deterministic() {
        let candles = path(&[104.0, 100.0, 110.0, 103.82, 107.0, 102.14, 102.5], 7);
        let a = detect(&candles);
        let b = detect(&candles);
        assert_eq!(a.len(), b.len());
    }
}
