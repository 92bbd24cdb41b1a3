// =============================================================================
// Chart Patterns — multi-candle structure over a 20–50 bar window
// =============================================================================
//
// Detection is swing-point based: local extremes are extracted with a
// two-bar confirmation on each side, then each detector tests the geometric
// relationship the pattern requires.
//
//   Double Top / Bottom      — matched extremes within 1 %
//   Head & Shoulders (+inv)  — triple swing with shoulder symmetry within 5 %
//   Triangles                — slopes of swing highs vs swing lows
//   Bull / Bear Flag         — pole >= 2 % move, flag range < 0.5 pole range
//   Rising / Falling Wedge   — converging same-sign slopes
// =============================================================================

use crate::indicators::regression::linreg_slope;
use crate::market_data::Candle;
use crate::types::{Vote, VoteDirection};

/// Window bounds for chart-pattern analysis.
const MIN_WINDOW: usize = 20;
const MAX_WINDOW: usize = 50;

/// A confirmed local extreme.
#[derive(Debug, Clone, Copy)]
struct Swing {
    index: usize,
    price: f64,
}

/// Run every chart-pattern detector over the window (oldest first).
pub fn detect(candles: &[Candle]) -> Vec<Vote> {
    if candles.len() < MIN_WINDOW {
        return Vec::new();
    }
    let window = &candles[candles.len().saturating_sub(MAX_WINDOW)..];

    let highs = swing_points(window, true);
    let lows = swing_points(window, false);

    let mut votes = Vec::new();
    if let Some(v) = double_extreme(window, &highs, &lows) {
        votes.push(v);
    }
    if let Some(v) = head_and_shoulders(window, &highs, &lows) {
        votes.push(v);
    }
    if let Some(v) = triangle_or_wedge(window) {
        votes.push(v);
    }
    if let Some(v) = flag(window) {
        votes.push(v);
    }
    votes
}

/// Local extremes confirmed by two lower (higher) bars on each side.
fn swing_points(candles: &[Candle], highs: bool) -> Vec<Swing> {
    let mut swings = Vec::new();
    if candles.len() < 5 {
        return swings;
    }

    for i in 2..candles.len() - 2 {
        let value = |c: &Candle| if highs { c.high } else { c.low };
        let v = value(&candles[i]);
        let confirmed = if highs {
            v > value(&candles[i - 1])
                && v > value(&candles[i - 2])
                && v > value(&candles[i + 1])
                && v > value(&candles[i + 2])
        } else {
            v < value(&candles[i - 1])
                && v < value(&candles[i - 2])
                && v < value(&candles[i + 1])
                && v < value(&candles[i + 2])
        };
        if confirmed {
            swings.push(Swing { index: i, price: v });
        }
    }
    swings
}

/// Double Top / Double Bottom: the last two swing extremes match within 1 %.
fn double_extreme(candles: &[Candle], highs: &[Swing], lows: &[Swing]) -> Option<Vote> {
    let last_close = candles.last()?.close;

    if highs.len() >= 2 {
        let a = highs[highs.len() - 2];
        let b = highs[highs.len() - 1];
        let diff = (a.price - b.price).abs() / a.price.abs().max(1e-12);
        if diff <= 0.01 && last_close < a.price.min(b.price) {
            let quality = 1.0 - diff / 0.01;
            return Some(Vote::new(
                "double_top",
                VoteDirection::Down,
                (1.2 + quality).clamp(0.5, 2.5),
                "two rejections at the same high",
            ));
        }
    }

    if lows.len() >= 2 {
        let a = lows[lows.len() - 2];
        let b = lows[lows.len() - 1];
        let diff = (a.price - b.price).abs() / a.price.abs().max(1e-12);
        if diff <= 0.01 && last_close > a.price.max(b.price) {
            let quality = 1.0 - diff / 0.01;
            return Some(Vote::new(
                "double_bottom",
                VoteDirection::Up,
                (1.2 + quality).clamp(0.5, 2.5),
                "two defenses of the same low",
            ));
        }
    }

    None
}

/// Head & Shoulders / Inverse: three swings where the middle dominates and
/// the shoulders match within 5 %.
fn head_and_shoulders(candles: &[Candle], highs: &[Swing], lows: &[Swing]) -> Option<Vote> {
    let last_close = candles.last()?.close;

    if highs.len() >= 3 {
        let [l, h, r] = [
            highs[highs.len() - 3],
            highs[highs.len() - 2],
            highs[highs.len() - 1],
        ];
        let shoulder_diff = (l.price - r.price).abs() / l.price.abs().max(1e-12);
        if h.price > l.price && h.price > r.price && shoulder_diff <= 0.05 && last_close < r.price
        {
            return Some(Vote::new(
                "head_and_shoulders",
                VoteDirection::Down,
                (1.3 + (1.0 - shoulder_diff / 0.05)).clamp(0.5, 2.5),
                "failed higher high between matched shoulders",
            ));
        }
    }

    if lows.len() >= 3 {
        let [l, h, r] = [
            lows[lows.len() - 3],
            lows[lows.len() - 2],
            lows[lows.len() - 1],
        ];
        let shoulder_diff = (l.price - r.price).abs() / l.price.abs().max(1e-12);
        if h.price < l.price && h.price < r.price && shoulder_diff <= 0.05 && last_close > r.price
        {
            return Some(Vote::new(
                "inverse_head_and_shoulders",
                VoteDirection::Up,
                (1.3 + (1.0 - shoulder_diff / 0.05)).clamp(0.5, 2.5),
                "failed lower low between matched shoulders",
            ));
        }
    }

    None
}

/// Triangles and wedges from the slope of highs vs the slope of lows,
/// normalized by price so thresholds are scale-free.
fn triangle_or_wedge(candles: &[Candle]) -> Option<Vote> {
    let n = candles.len().min(30);
    let window = &candles[candles.len() - n..];

    let highs: Vec<f64> = window.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = window.iter().map(|c| c.low).collect();
    let price = window.last()?.close;
    if price <= 0.0 {
        return None;
    }

    let high_slope = linreg_slope(&highs, n)? / price;
    let low_slope = linreg_slope(&lows, n)? / price;

    let flat = 2e-4;
    let steep = 5e-4;

    // Ascending: flat top, rising lows — pressure builds upward.
    if high_slope.abs() < flat && low_slope > steep {
        return Some(Vote::new(
            "ascending_triangle",
            VoteDirection::Up,
            1.2,
            "rising lows squeezing a flat ceiling",
        ));
    }
    // Descending: flat bottom, falling highs.
    if low_slope.abs() < flat && high_slope < -steep {
        return Some(Vote::new(
            "descending_triangle",
            VoteDirection::Down,
            1.2,
            "falling highs pressing a flat floor",
        ));
    }
    // Symmetrical: converging from both sides — break with the entry trend.
    if high_slope < -steep && low_slope > steep {
        let first = window.first()?.close;
        let direction = if price >= first {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        return Some(Vote::new(
            "symmetrical_triangle",
            direction,
            0.8,
            "two-sided compression",
        ));
    }
    // Rising wedge: both rising but converging — bearish exhaustion.
    if high_slope > steep && low_slope > high_slope * 1.2 {
        return Some(Vote::new(
            "rising_wedge",
            VoteDirection::Down,
            1.0,
            "rising structure losing upward room",
        ));
    }
    // Falling wedge: both falling but converging — bullish exhaustion.
    if high_slope < -steep && low_slope < 0.0 && high_slope < low_slope * 1.2 {
        return Some(Vote::new(
            "falling_wedge",
            VoteDirection::Up,
            1.0,
            "falling structure losing downward room",
        ));
    }

    None
}

/// Bull / Bear Flag: an impulsive pole followed by a narrow consolidation.
fn flag(candles: &[Candle]) -> Option<Vote> {
    if candles.len() < 12 {
        return None;
    }
    // Pole: the 8 bars before the 4-bar flag.
    let flag_len = 4;
    let pole_len = 8;
    let total = flag_len + pole_len;
    let window = &candles[candles.len() - total..];
    let (pole, flag) = window.split_at(pole_len);

    let pole_start = pole.first()?.close;
    let pole_end = pole.last()?.close;
    if pole_start <= 0.0 {
        return None;
    }
    let pole_move = (pole_end - pole_start) / pole_start;
    if pole_move.abs() < 0.02 {
        return None;
    }

    let pole_range = pole
        .iter()
        .map(|c| c.high)
        .fold(f64::MIN, f64::max)
        - pole.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let flag_range = flag
        .iter()
        .map(|c| c.high)
        .fold(f64::MIN, f64::max)
        - flag.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    if pole_range <= 0.0 || flag_range >= 0.5 * pole_range {
        return None;
    }

    let quality = (pole_move.abs() / 0.02).min(2.0) * 0.4;
    if pole_move > 0.0 {
        Some(Vote::new(
            "bull_flag",
            VoteDirection::Up,
            (1.1 + quality).clamp(0.5, 2.5),
            "tight consolidation after an upward pole",
        ))
    } else {
        Some(Vote::new(
            "bear_flag",
            VoteDirection::Down,
            (1.1 + quality).clamp(0.5, 2.5),
            "tight consolidation after a downward pole",
        ))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "R_100".into(),
            timeframe: 60,
            open: (high + low) / 2.0,
            high,
            low,
            close,
            start_epoch: 0,
            tick_count: 10,
            is_forming: false,
        }
    }

    fn has(votes: &[Vote], name: &str) -> bool {
        votes.iter().any(|v| v.indicator == name)
    }

    /// A calm baseline segment.
    fn base_segment(n: usize, level: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let wobble = if i % 2 == 0 { 0.05 } else { -0.05 };
                candle(level + 0.3 + wobble, level - 0.3 + wobble, level + wobble)
            })
            .collect()
    }

    #[test]
    fn too_short_window_is_empty() {
        let candles = base_segment(10, 100.0);
        assert!(detect(&candles).is_empty());
    }

    #[test]
    fn double_top_detected() {
        let mut candles = base_segment(8, 100.0);
        // First peak.
        for &p in &[101.0, 102.5, 104.0, 102.5, 101.0] {
            candles.push(candle(p + 0.2, p - 0.5, p));
        }
        candles.extend(base_segment(4, 100.5));
        // Second peak at the same level (within 1%).
        for &p in &[101.0, 102.6, 104.02, 102.4, 101.0] {
            candles.push(candle(p + 0.2, p - 0.5, p));
        }
        candles.extend(base_segment(4, 100.0));
        let votes = detect(&candles);
        assert!(has(&votes, "double_top"), "votes: {votes:?}");
    }

    #[test]
    fn double_bottom_detected() {
        let mut candles = base_segment(8, 100.0);
        for &p in &[99.0, 97.5, 96.0, 97.5, 99.0] {
            candles.push(candle(p + 0.5, p - 0.2, p));
        }
        candles.extend(base_segment(4, 99.5));
        for &p in &[99.0, 97.4, 95.98, 97.6, 99.0] {
            candles.push(candle(p + 0.5, p - 0.2, p));
        }
        candles.extend(base_segment(4, 100.0));
        let votes = detect(&candles);
        assert!(has(&votes, "double_bottom"), "votes: {votes:?}");
    }

    #[test]
    fn head_and_shoulders_detected() {
        let mut candles = base_segment(6, 100.0);
        // Left shoulder, head, right shoulder.
        for &p in &[101.0, 103.0, 101.0] {
            candles.push(candle(p + 0.2, p - 0.6, p));
        }
        candles.extend(base_segment(3, 100.0));
        for &p in &[102.0, 106.0, 102.0] {
            candles.push(candle(p + 0.2, p - 0.6, p));
        }
        candles.extend(base_segment(3, 100.0));
        for &p in &[101.0, 103.1, 101.0] {
            candles.push(candle(p + 0.2, p - 0.6, p));
        }
        candles.extend(base_segment(4, 99.0));
        let votes = detect(&candles);
        assert!(has(&votes, "head_and_shoulders"), "votes: {votes:?}");
    }

    #[test]
    fn ascending_triangle_detected() {
        // Flat ceiling at 105, lows stepping up.
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let low = 95.0 + i as f64 * 0.3;
                candle(105.0, low, (105.0 + low) / 2.0)
            })
            .collect();
        let votes = detect(&candles);
        assert!(has(&votes, "ascending_triangle"), "votes: {votes:?}");
    }

    #[test]
    fn descending_triangle_detected() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let high = 115.0 - i as f64 * 0.3;
                candle(high, 95.0, (high + 95.0) / 2.0)
            })
            .collect();
        let votes = detect(&candles);
        assert!(has(&votes, "descending_triangle"), "votes: {votes:?}");
    }

    #[test]
    fn bull_flag_detected() {
        let mut candles = base_segment(10, 100.0);
        // Pole: +4% over 8 bars.
        for i in 0..8 {
            let base = 100.0 + i as f64 * 0.5;
            candles.push(candle(base + 0.4, base - 0.2, base + 0.35));
        }
        // Flag: tight range near the top.
        for _ in 0..4 {
            candles.push(candle(103.8, 103.3, 103.5));
        }
        let votes = detect(&candles);
        assert!(has(&votes, "bull_flag"), "votes: {votes:?}");
    }

    #[test]
    fn no_flag_without_pole() {
        let candles = base_segment(30, 100.0);
        let votes = detect(&candles);
        assert!(!has(&votes, "bull_flag"));
        assert!(!has(&votes, "bear_flag"));
    }

    #[test]
    fn deterministic() {
        let mut candles = base_segment(10, 100.0);
        for i in 0..8 {
            let base = 100.0 + i as f64 * 0.5;
            candles.push(candle(base + 0.4, base - 0.2, base + 0.35));
        }
        for _ in 0..4 {
            candles.push(candle(103.8, 103.3, 103.5));
        }
        let a = detect(&candles);
        let b = detect(&candles);
        assert_eq!(a.len(), b.len());
    }
}
