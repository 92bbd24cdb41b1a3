// =============================================================================
// Candlestick Patterns — single- to five-candle formations
// =============================================================================
//
// Every detector is pure and idempotent: the same window always produces the
// same votes. Vote weights are scaled by match quality into [0.5, 2.5].
//
// Context matters for the hammer family: the same anatomy is a Hammer at the
// bottom of a decline and a Hanging Man at the top of a rally, so detectors
// read the short trend leading into the pattern.
// =============================================================================

use crate::market_data::Candle;
use crate::types::{Vote, VoteDirection};

/// Weight bounds for pattern votes.
const MIN_WEIGHT: f64 = 0.5;
const MAX_WEIGHT: f64 = 2.5;

fn clamp_weight(w: f64) -> f64 {
    w.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Percent change across the candles leading into the pattern window.
/// Positive means the market walked up into the pattern.
fn entry_trend(candles: &[Candle], pattern_len: usize) -> f64 {
    let lookback = 5;
    if candles.len() < pattern_len + 2 {
        return 0.0;
    }
    let end = candles.len() - pattern_len;
    let start = end.saturating_sub(lookback);
    let first = candles[start].close;
    let last = candles[end - 1].close;
    if first <= 0.0 {
        return 0.0;
    }
    (last - first) / first
}

/// Run every candlestick detector over the window (oldest first).
pub fn detect(candles: &[Candle]) -> Vec<Vote> {
    let mut votes = Vec::new();

    if let Some(v) = engulfing(candles) {
        votes.push(v);
    }
    if let Some(v) = hammer_family(candles) {
        votes.push(v);
    }
    if let Some(v) = doji(candles) {
        votes.push(v);
    }
    if let Some(v) = star(candles) {
        votes.push(v);
    }
    if let Some(v) = three_soldiers_or_crows(candles) {
        votes.push(v);
    }
    if let Some(v) = inside_bar(candles) {
        votes.push(v);
    }
    if let Some(v) = outside_bar(candles) {
        votes.push(v);
    }
    if let Some(v) = tweezer(candles) {
        votes.push(v);
    }
    if let Some(v) = piercing_or_dark_cloud(candles) {
        votes.push(v);
    }
    if let Some(v) = three_methods(candles) {
        votes.push(v);
    }
    if let Some(v) = harami(candles) {
        votes.push(v);
    }
    if let Some(v) = wick_rejection(candles) {
        votes.push(v);
    }

    votes
}

// ── Two-candle reversals ────────────────────────────────────────────────────

/// Bullish/Bearish Engulfing: direction flip where the second body is at
/// least 1.2x the first and swallows it entirely.
fn engulfing(candles: &[Candle]) -> Option<Vote> {
    let [prev, last] = last_n::<2>(candles)?;

    let prev_body = prev.body();
    let last_body = last.body();
    if prev_body <= 0.0 || last_body < 1.2 * prev_body {
        return None;
    }

    let bullish = prev.is_bearish()
        && last.is_bullish()
        && last.open <= prev.close
        && last.close >= prev.open;
    let bearish = prev.is_bullish()
        && last.is_bearish()
        && last.open >= prev.close
        && last.close <= prev.open;

    if !bullish && !bearish {
        return None;
    }

    let quality = (last_body / prev_body - 1.2).min(1.3);
    let weight = clamp_weight(1.2 + quality);
    if bullish {
        Some(Vote::new(
            "bullish_engulfing",
            VoteDirection::Up,
            weight,
            "bullish candle engulfs prior bearish body",
        ))
    } else {
        Some(Vote::new(
            "bearish_engulfing",
            VoteDirection::Down,
            weight,
            "bearish candle engulfs prior bullish body",
        ))
    }
}

/// Harami: a small body held entirely inside the prior large body.
fn harami(candles: &[Candle]) -> Option<Vote> {
    let [prev, last] = last_n::<2>(candles)?;

    let prev_body = prev.body();
    if prev_body <= 0.0 || last.body() > 0.6 * prev_body {
        return None;
    }

    let prev_top = prev.open.max(prev.close);
    let prev_bottom = prev.open.min(prev.close);
    let inside = last.open > prev_bottom
        && last.open < prev_top
        && last.close > prev_bottom
        && last.close < prev_top;
    if !inside {
        return None;
    }

    if prev.is_bearish() && last.is_bullish() {
        Some(Vote::new(
            "bullish_harami",
            VoteDirection::Up,
            0.9,
            "small bullish body inside prior bearish candle",
        ))
    } else if prev.is_bullish() && last.is_bearish() {
        Some(Vote::new(
            "bearish_harami",
            VoteDirection::Down,
            0.9,
            "small bearish body inside prior bullish candle",
        ))
    } else {
        None
    }
}

// ── Single-candle formations ────────────────────────────────────────────────

/// Hammer / Hanging Man / Inverted Hammer / Shooting Star.
fn hammer_family(candles: &[Candle]) -> Option<Vote> {
    let [last] = last_n::<1>(candles)?;
    let range = last.range();
    if range <= 0.0 {
        return None;
    }

    let body = last.body();
    let upper = last.upper_wick();
    let lower = last.lower_wick();

    let body_small = body < 0.4 * range;
    let lower_dominant = lower >= 0.6 * range && lower >= 2.0 * body;
    let upper_dominant = upper >= 0.6 * range && upper >= 2.0 * body;
    if !body_small || (!lower_dominant && !upper_dominant) {
        return None;
    }

    let trend = entry_trend(candles, 1);
    let wick_frac = lower.max(upper) / range;
    let weight = clamp_weight(0.8 + wick_frac);

    let (name, direction, reason) = if lower_dominant && trend < 0.0 {
        ("hammer", VoteDirection::Up, "long lower wick after decline")
    } else if lower_dominant {
        ("hanging_man", VoteDirection::Down, "long lower wick after rally")
    } else if trend < 0.0 {
        ("inverted_hammer", VoteDirection::Up, "long upper wick after decline")
    } else {
        ("shooting_star", VoteDirection::Down, "long upper wick after rally")
    };

    Some(Vote::new(name, direction, weight, reason))
}

/// Doji and its sub-classes. Indecision, so the vote is neutral.
fn doji(candles: &[Candle]) -> Option<Vote> {
    let [last] = last_n::<1>(candles)?;
    let range = last.range();
    if range <= 0.0 || last.body() >= 0.1 * range {
        return None;
    }

    let upper = last.upper_wick() / range;
    let lower = last.lower_wick() / range;

    let name = if upper >= 0.7 {
        "gravestone_doji"
    } else if lower >= 0.7 {
        "dragonfly_doji"
    } else if upper >= 0.3 && lower >= 0.3 {
        "long_legged_doji"
    } else {
        "doji"
    };

    Some(Vote::new(
        name,
        VoteDirection::Neutral,
        0.5,
        "indecision candle",
    ))
}

/// Upper / lower wick rejection on an otherwise ordinary candle.
fn wick_rejection(candles: &[Candle]) -> Option<Vote> {
    let [last] = last_n::<1>(candles)?;
    let range = last.range();
    let body = last.body();
    if range <= 0.0 || body < 0.1 * range {
        // Doji handles the tiny-body case.
        return None;
    }

    let upper = last.upper_wick();
    let lower = last.lower_wick();

    if upper >= 2.0 * body && upper >= 0.5 * range {
        Some(Vote::new(
            "upper_wick_rejection",
            VoteDirection::Down,
            clamp_weight(0.7 + upper / range),
            "sellers rejected the highs",
        ))
    } else if lower >= 2.0 * body && lower >= 0.5 * range {
        Some(Vote::new(
            "lower_wick_rejection",
            VoteDirection::Up,
            clamp_weight(0.7 + lower / range),
            "buyers rejected the lows",
        ))
    } else {
        None
    }
}

// ── Three-candle formations ─────────────────────────────────────────────────

/// Morning Star / Evening Star.
fn star(candles: &[Candle]) -> Option<Vote> {
    let [first, middle, last] = last_n::<3>(candles)?;

    let first_body = first.body();
    if first_body <= 0.0 || middle.body() > 0.5 * first_body {
        return None;
    }

    let first_mid = (first.open + first.close) / 2.0;

    let morning = first.is_bearish()
        && last.is_bullish()
        && last.close > first_mid
        && last.body() >= 0.5 * first_body;
    let evening = first.is_bullish()
        && last.is_bearish()
        && last.close < first_mid
        && last.body() >= 0.5 * first_body;

    if morning {
        let quality = ((last.close - first_mid) / first_body).min(1.0);
        Some(Vote::new(
            "morning_star",
            VoteDirection::Up,
            clamp_weight(1.3 + quality),
            "three-candle reversal from the lows",
        ))
    } else if evening {
        let quality = ((first_mid - last.close) / first_body).min(1.0);
        Some(Vote::new(
            "evening_star",
            VoteDirection::Down,
            clamp_weight(1.3 + quality),
            "three-candle reversal from the highs",
        ))
    } else {
        None
    }
}

/// Three White Soldiers / Three Black Crows.
fn three_soldiers_or_crows(candles: &[Candle]) -> Option<Vote> {
    let [a, b, c] = last_n::<3>(candles)?;

    let solid = |x: &Candle| x.range() > 0.0 && x.body() >= 0.5 * x.range();
    if !(solid(a) && solid(b) && solid(c)) {
        return None;
    }

    let soldiers = a.is_bullish()
        && b.is_bullish()
        && c.is_bullish()
        && b.close > a.close
        && c.close > b.close;
    let crows = a.is_bearish()
        && b.is_bearish()
        && c.is_bearish()
        && b.close < a.close
        && c.close < b.close;

    if soldiers {
        Some(Vote::new(
            "three_white_soldiers",
            VoteDirection::Up,
            1.6,
            "three consecutive full-bodied advances",
        ))
    } else if crows {
        Some(Vote::new(
            "three_black_crows",
            VoteDirection::Down,
            1.6,
            "three consecutive full-bodied declines",
        ))
    } else {
        None
    }
}

// ── Range-relationship patterns ─────────────────────────────────────────────

/// Inside Bar: contraction inside the prior candle's range.
fn inside_bar(candles: &[Candle]) -> Option<Vote> {
    let [prev, last] = last_n::<2>(candles)?;
    if last.high < prev.high && last.low > prev.low {
        // Continuation bias in the direction of the mother bar.
        let direction = if prev.is_bullish() {
            VoteDirection::Up
        } else if prev.is_bearish() {
            VoteDirection::Down
        } else {
            VoteDirection::Neutral
        };
        Some(Vote::new(
            "inside_bar",
            direction,
            0.6,
            "range contraction inside the prior candle",
        ))
    } else {
        None
    }
}

/// Outside Bar: engulfs the prior candle's full range.
fn outside_bar(candles: &[Candle]) -> Option<Vote> {
    let [prev, last] = last_n::<2>(candles)?;
    if last.high > prev.high && last.low < prev.low && last.body() > 0.0 {
        let direction = if last.is_bullish() {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        Some(Vote::new(
            "outside_bar",
            direction,
            1.0,
            "full-range engulfment of the prior candle",
        ))
    } else {
        None
    }
}

/// Tweezer Top / Bottom: matched extremes with opposing candle directions.
fn tweezer(candles: &[Candle]) -> Option<Vote> {
    let [prev, last] = last_n::<2>(candles)?;
    let ref_price = prev.close.abs().max(1e-12);
    let tol = ref_price * 0.001;

    let top = (prev.high - last.high).abs() <= tol && prev.is_bullish() && last.is_bearish();
    let bottom = (prev.low - last.low).abs() <= tol && prev.is_bearish() && last.is_bullish();

    if top {
        Some(Vote::new(
            "tweezer_top",
            VoteDirection::Down,
            1.1,
            "matched highs rejected twice",
        ))
    } else if bottom {
        Some(Vote::new(
            "tweezer_bottom",
            VoteDirection::Up,
            1.1,
            "matched lows defended twice",
        ))
    } else {
        None
    }
}

/// Piercing Line / Dark Cloud Cover.
fn piercing_or_dark_cloud(candles: &[Candle]) -> Option<Vote> {
    let [prev, last] = last_n::<2>(candles)?;
    let prev_body = prev.body();
    if prev_body <= 0.0 {
        return None;
    }
    let prev_mid = (prev.open + prev.close) / 2.0;

    let piercing = prev.is_bearish()
        && last.is_bullish()
        && last.open < prev.close
        && last.close > prev_mid
        && last.close < prev.open;
    let dark_cloud = prev.is_bullish()
        && last.is_bearish()
        && last.open > prev.close
        && last.close < prev_mid
        && last.close > prev.open;

    if piercing {
        Some(Vote::new(
            "piercing_line",
            VoteDirection::Up,
            1.2,
            "gap down reclaimed past the prior midpoint",
        ))
    } else if dark_cloud {
        Some(Vote::new(
            "dark_cloud_cover",
            VoteDirection::Down,
            1.2,
            "gap up sold past the prior midpoint",
        ))
    } else {
        None
    }
}

/// Rising / Falling Three Methods — five-candle continuation.
fn three_methods(candles: &[Candle]) -> Option<Vote> {
    let [a, b, c, d, e] = last_n::<5>(candles)?;

    let a_body = a.body();
    if a_body <= 0.0 {
        return None;
    }
    let small = |x: &Candle| x.body() <= 0.6 * a_body;
    let within = |x: &Candle| x.high <= a.high.max(e.high) && x.low >= a.low.min(e.low);
    if !(small(b) && small(c) && small(d) && within(b) && within(c) && within(d)) {
        return None;
    }

    let rising = a.is_bullish()
        && e.is_bullish()
        && (b.is_bearish() || c.is_bearish() || d.is_bearish())
        && e.close > a.close;
    let falling = a.is_bearish()
        && e.is_bearish()
        && (b.is_bullish() || c.is_bullish() || d.is_bullish())
        && e.close < a.close;

    if rising {
        Some(Vote::new(
            "rising_three_methods",
            VoteDirection::Up,
            1.4,
            "shallow pullback resolved upward",
        ))
    } else if falling {
        Some(Vote::new(
            "falling_three_methods",
            VoteDirection::Down,
            1.4,
            "shallow bounce resolved downward",
        ))
    } else {
        None
    }
}

/// Borrow the last `N` candles as an array of references, oldest first.
fn last_n<const N: usize>(candles: &[Candle]) -> Option<[&Candle; N]> {
    if candles.len() < N {
        return None;
    }
    let tail = &candles[candles.len() - N..];
    let mut out: [&Candle; N] = [&tail[0]; N];
    for (i, c) in tail.iter().enumerate() {
        out[i] = c;
    }
    Some(out)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open,
            high,
            low,
            close,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    fn flat_context(n: usize) -> Vec<Candle> {
        vec![candle(100.0, 100.6, 99.5, 100.1); n]
    }

    fn has(votes: &[Vote], name: &str) -> bool {
        votes.iter().any(|v| v.indicator == name)
    }

    #[test]
    fn bullish_engulfing_detected() {
        let mut candles = flat_context(5);
        candles.push(candle(100.0, 100.4, 99.2, 99.4)); // bearish
        candles.push(candle(99.2, 101.3, 99.0, 101.0)); // engulfs it
        let votes = detect(&candles);
        assert!(has(&votes, "bullish_engulfing"));
        let v = votes
            .iter()
            .find(|v| v.indicator == "bullish_engulfing")
            .unwrap();
        assert_eq!(v.direction, VoteDirection::Up);
        assert!((0.5..=2.5).contains(&v.weight));
    }

    #[test]
    fn engulfing_requires_body_ratio() {
        let mut candles = flat_context(5);
        candles.push(candle(100.0, 100.4, 99.2, 99.4));
        // Flip but body barely larger than prior — no signal.
        candles.push(candle(99.35, 100.2, 99.3, 100.0));
        let votes = detect(&candles);
        assert!(!has(&votes, "bullish_engulfing"));
    }

    #[test]
    fn hammer_after_decline() {
        let mut candles: Vec<Candle> = (0..6)
            .map(|i| {
                let base = 105.0 - i as f64;
                candle(base, base + 0.3, base - 1.2, base - 1.0)
            })
            .collect();
        // Long lower wick, small body near the top of the range.
        candles.push(candle(99.0, 99.3, 96.0, 99.1));
        let votes = detect(&candles);
        assert!(has(&votes, "hammer"));
    }

    #[test]
    fn shooting_star_after_rally() {
        let mut candles: Vec<Candle> = (0..6)
            .map(|i| {
                let base = 95.0 + i as f64;
                candle(base, base + 1.2, base - 0.3, base + 1.0)
            })
            .collect();
        candles.push(candle(101.0, 104.0, 100.9, 100.95));
        let votes = detect(&candles);
        assert!(has(&votes, "shooting_star"));
    }

    #[test]
    fn doji_subclasses() {
        let mut candles = flat_context(3);
        candles.push(candle(100.0, 102.0, 99.98, 100.01)); // gravestone
        assert!(has(&detect(&candles), "gravestone_doji"));

        let mut candles = flat_context(3);
        candles.push(candle(100.0, 100.02, 98.0, 100.01)); // dragonfly
        assert!(has(&detect(&candles), "dragonfly_doji"));

        let mut candles = flat_context(3);
        candles.push(candle(100.0, 101.0, 99.0, 100.01)); // long-legged
        assert!(has(&detect(&candles), "long_legged_doji"));
    }

    #[test]
    fn morning_star_reversal() {
        let mut candles = flat_context(4);
        candles.push(candle(102.0, 102.2, 99.8, 100.0)); // big bearish
        candles.push(candle(99.8, 100.1, 99.5, 99.9)); // indecision
        candles.push(candle(100.0, 101.8, 99.9, 101.6)); // strong bullish
        let votes = detect(&candles);
        assert!(has(&votes, "morning_star"));
    }

    #[test]
    fn three_white_soldiers() {
        let mut candles = flat_context(4);
        candles.push(candle(100.0, 101.1, 99.9, 101.0));
        candles.push(candle(101.0, 102.1, 100.9, 102.0));
        candles.push(candle(102.0, 103.1, 101.9, 103.0));
        let votes = detect(&candles);
        assert!(has(&votes, "three_white_soldiers"));
    }

    #[test]
    fn inside_and_outside_bars() {
        let mut candles = flat_context(4);
        candles.push(candle(100.0, 103.0, 97.0, 102.0));
        candles.push(candle(101.0, 102.0, 100.0, 101.5));
        assert!(has(&detect(&candles), "inside_bar"));

        let mut candles = flat_context(4);
        candles.push(candle(100.0, 101.0, 99.0, 100.5));
        candles.push(candle(100.8, 102.0, 98.0, 98.4));
        let votes = detect(&candles);
        assert!(has(&votes, "outside_bar"));
        let v = votes.iter().find(|v| v.indicator == "outside_bar").unwrap();
        assert_eq!(v.direction, VoteDirection::Down);
    }

    #[test]
    fn tweezer_top_detected() {
        let mut candles = flat_context(4);
        candles.push(candle(100.0, 102.0, 99.8, 101.8)); // bullish into the high
        candles.push(candle(101.8, 102.0, 100.2, 100.4)); // bearish off the same high
        assert!(has(&detect(&candles), "tweezer_top"));
    }

    #[test]
    fn piercing_line_detected() {
        let mut candles = flat_context(4);
        candles.push(candle(101.0, 101.2, 99.4, 99.6)); // bearish
        candles.push(candle(99.3, 100.9, 99.2, 100.5)); // opens below close, reclaims mid
        assert!(has(&detect(&candles), "piercing_line"));
    }

    #[test]
    fn rising_three_methods_detected() {
        let mut candles = flat_context(4);
        candles.push(candle(100.0, 102.2, 99.9, 102.0)); // pole
        candles.push(candle(101.8, 102.0, 101.2, 101.4));
        candles.push(candle(101.4, 101.6, 100.9, 101.1));
        candles.push(candle(101.1, 101.4, 100.7, 100.9));
        candles.push(candle(101.0, 103.0, 100.9, 102.8)); // resolution
        assert!(has(&detect(&candles), "rising_three_methods"));
    }

    #[test]
    fn harami_detected() {
        let mut candles = flat_context(4);
        candles.push(candle(102.0, 102.2, 99.0, 99.2)); // big bearish
        candles.push(candle(100.0, 100.8, 99.8, 100.6)); // small bullish inside
        assert!(has(&detect(&candles), "bullish_harami"));
    }

    #[test]
    fn wick_rejection_votes() {
        let mut candles = flat_context(4);
        candles.push(candle(100.0, 104.0, 99.8, 100.8)); // huge upper wick
        let votes = detect(&candles);
        let v = votes
            .iter()
            .find(|v| v.indicator == "upper_wick_rejection")
            .unwrap();
        assert_eq!(v.direction, VoteDirection::Down);
    }

    #[test]
    fn detectors_are_deterministic() {
        let mut candles = flat_context(5);
        candles.push(candle(100.0, 100.4, 99.2, 99.4));
        candles.push(candle(99.2, 101.3, 99.0, 101.0));
        let a = detect(&candles);
        let b = detect(&candles);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.indicator, y.indicator);
            assert_eq!(x.weight, y.weight);
        }
    }

    #[test]
    fn quiet_window_produces_no_directional_votes() {
        let candles = flat_context(8);
        let votes = detect(&candles);
        assert!(votes
            .iter()
            .all(|v| v.direction == VoteDirection::Neutral || v.weight < 1.0));
    }
}
