// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the market into one of five regimes by combining:
//
//   - swing structure (higher highs / higher lows over the last 30 candles)
//   - price-action class {CLEAN, MESSY, CHOPPY} from direction-change
//     frequency and wick dominance
//   - volatility level {LOW, MEDIUM, HIGH} from ATR and average range
//   - ADX tiers (ranging < 12, trending >= 18, strong >= 25)
//   - a trend-duration counter of consecutive confirming candles
//
// The assessment also answers the two questions the signal pipeline asks:
// "may we trade at all?" (tradeability) and "may we trade this direction?"
// (direction veto), plus a confidence penalty multiplier in [0.4, 1.0].
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{IndicatorValues, TrendDirection};
use crate::market_data::Candle;
use crate::types::Direction;

/// Swing-structure window.
const SWING_WINDOW: usize = 30;

/// ADX tiers.
const ADX_RANGING: f64 = 12.0;
const ADX_TRENDING: f64 = 18.0;
const ADX_STRONG: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Choppy,
    Unknown,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "TRENDING_UP"),
            Self::TrendingDown => write!(f, "TRENDING_DOWN"),
            Self::Ranging => write!(f, "RANGING"),
            Self::Choppy => write!(f, "CHOPPY"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceAction {
    Clean,
    Messy,
    Choppy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

/// Full regime assessment for one candle window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub regime: Regime,
    /// Confidence in the classification, [0, 1].
    pub strength: f64,
    pub is_tradeable: bool,
    pub reason: String,
    /// Consecutive candles confirming the dominant direction.
    pub trend_duration: u32,
    pub momentum_aligned: bool,
    pub volatility_level: VolatilityLevel,
    pub price_action: PriceAction,
}

impl RegimeAssessment {
    fn unknown(reason: impl Into<String>) -> Self {
        Self {
            regime: Regime::Unknown,
            strength: 0.0,
            is_tradeable: false,
            reason: reason.into(),
            trend_duration: 0,
            momentum_aligned: false,
            volatility_level: VolatilityLevel::Medium,
            price_action: PriceAction::Messy,
        }
    }

    /// Direction veto: no CALL against a strong downtrend, no PUT against a
    /// strong uptrend.
    pub fn allows(&self, direction: Direction) -> bool {
        match (direction, self.regime) {
            (Direction::Call, Regime::TrendingDown) => self.strength <= 0.5,
            (Direction::Put, Regime::TrendingUp) => self.strength <= 0.5,
            _ => true,
        }
    }

    /// Multiplier applied to signal confidence, in [0.4, 1.0].
    pub fn confidence_penalty(&self) -> f64 {
        match self.regime {
            Regime::TrendingUp | Regime::TrendingDown => {
                (0.7 + 0.3 * self.strength).clamp(0.4, 1.0)
            }
            Regime::Ranging => 0.75,
            Regime::Choppy => 0.4,
            Regime::Unknown => 0.5,
        }
    }
}

/// Assess the regime over a candle window (oldest first).
pub fn assess(candles: &[Candle], indicators: &IndicatorValues) -> RegimeAssessment {
    if candles.len() < SWING_WINDOW {
        return RegimeAssessment::unknown(format!(
            "insufficient history: {} candles",
            candles.len()
        ));
    }
    let window = &candles[candles.len() - SWING_WINDOW..];

    let adx = indicators.adx.unwrap_or(0.0);
    let price_action = classify_price_action(window);
    let volatility_level = classify_volatility(window, indicators);
    let swings = swing_structure(window);
    let trend_duration = trend_run(window);

    // ── Regime classification ───────────────────────────────────────────
    let ema_direction = match (indicators.ema9, indicators.ema21) {
        (Some(e9), Some(e21)) if e9 > e21 => 1,
        (Some(e9), Some(e21)) if e9 < e21 => -1,
        _ => 0,
    };

    let (regime, strength) = if price_action == PriceAction::Choppy && adx < ADX_TRENDING {
        (Regime::Choppy, (1.0 - adx / ADX_TRENDING).clamp(0.3, 1.0))
    } else if adx >= ADX_TRENDING {
        let direction = if swings.net_bias > 0 || (swings.net_bias == 0 && ema_direction > 0) {
            Regime::TrendingUp
        } else if swings.net_bias < 0 || ema_direction < 0 {
            Regime::TrendingDown
        } else {
            Regime::Ranging
        };
        let adx_strength = ((adx - ADX_TRENDING) / (50.0 - ADX_TRENDING)).clamp(0.0, 1.0);
        let swing_strength = if swings.confirmed { 0.3 } else { 0.0 };
        (
            direction,
            (0.4 + 0.6 * adx_strength + swing_strength).clamp(0.0, 1.0),
        )
    } else if adx < ADX_RANGING {
        (Regime::Ranging, (1.0 - adx / ADX_RANGING).clamp(0.2, 0.8))
    } else {
        // Between the tiers: lean on swing structure, weakly.
        match swings.net_bias {
            b if b > 0 => (Regime::TrendingUp, 0.35),
            b if b < 0 => (Regime::TrendingDown, 0.35),
            _ => (Regime::Ranging, 0.3),
        }
    };

    // ── Momentum alignment ──────────────────────────────────────────────
    let candidate = match regime {
        Regime::TrendingUp => Direction::Call,
        Regime::TrendingDown => Direction::Put,
        _ => {
            if ema_direction >= 0 {
                Direction::Call
            } else {
                Direction::Put
            }
        }
    };
    let momentum_aligned = momentum_alignment(indicators, candidate);

    // ── Tradeability ────────────────────────────────────────────────────
    let mut reason = format!("{regime} (adx {adx:.1}, strength {strength:.2})");
    let is_tradeable = if regime == Regime::Choppy && volatility_level == VolatilityLevel::High {
        reason = format!("choppy high-volatility market (adx {adx:.1})");
        false
    } else if regime == Regime::Choppy {
        reason = format!("choppy price action (adx {adx:.1})");
        false
    } else if trend_duration < 2 && matches!(regime, Regime::TrendingUp | Regime::TrendingDown)
    {
        reason = format!("trend too young: {trend_duration} confirming candles");
        false
    } else if !swings.confirmed && strength <= 0.4 {
        reason = format!("unconfirmed structure at strength {strength:.2}");
        false
    } else {
        true
    };

    debug!(
        regime = %regime,
        adx = format!("{adx:.1}"),
        strength = format!("{strength:.2}"),
        duration = trend_duration,
        tradeable = is_tradeable,
        "regime assessed"
    );

    RegimeAssessment {
        regime,
        strength,
        is_tradeable,
        reason,
        trend_duration,
        momentum_aligned,
        volatility_level,
        price_action,
    }
}

/// Swing structure summary.
struct SwingSummary {
    /// +1 when both highs and lows step upward, -1 when both step down.
    net_bias: i32,
    /// Both sides agree (higher highs AND higher lows, or the inverse).
    confirmed: bool,
}

fn swing_structure(window: &[Candle]) -> SwingSummary {
    // Compare extreme levels of the window's three thirds.
    let third = window.len() / 3;
    let (a, rest) = window.split_at(third);
    let (b, c) = rest.split_at(third);

    let high_of = |s: &[Candle]| s.iter().map(|x| x.high).fold(f64::MIN, f64::max);
    let low_of = |s: &[Candle]| s.iter().map(|x| x.low).fold(f64::MAX, f64::min);

    let higher_highs = high_of(b) > high_of(a) && high_of(c) > high_of(b);
    let higher_lows = low_of(b) > low_of(a) && low_of(c) > low_of(b);
    let lower_highs = high_of(b) < high_of(a) && high_of(c) < high_of(b);
    let lower_lows = low_of(b) < low_of(a) && low_of(c) < low_of(b);

    if higher_highs && higher_lows {
        SwingSummary {
            net_bias: 1,
            confirmed: true,
        }
    } else if lower_highs && lower_lows {
        SwingSummary {
            net_bias: -1,
            confirmed: true,
        }
    } else if higher_highs || higher_lows {
        SwingSummary {
            net_bias: 1,
            confirmed: false,
        }
    } else if lower_highs || lower_lows {
        SwingSummary {
            net_bias: -1,
            confirmed: false,
        }
    } else {
        SwingSummary {
            net_bias: 0,
            confirmed: false,
        }
    }
}

/// CLEAN / MESSY / CHOPPY from direction changes and wick dominance.
fn classify_price_action(window: &[Candle]) -> PriceAction {
    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    let mut changes = 0usize;
    let mut moves = 0usize;
    let mut prev_dir = 0i8;
    for w in closes.windows(2) {
        let dir = if w[1] > w[0] {
            1
        } else if w[1] < w[0] {
            -1
        } else {
            0
        };
        if dir == 0 {
            continue;
        }
        moves += 1;
        if prev_dir != 0 && dir != prev_dir {
            changes += 1;
        }
        prev_dir = dir;
    }
    let change_ratio = if moves > 1 {
        changes as f64 / (moves - 1) as f64
    } else {
        0.0
    };

    let wick_dominance = {
        let (wicks, total) = window.iter().fold((0.0, 0.0), |(w, t), c| {
            (w + c.upper_wick() + c.lower_wick(), t + c.range())
        });
        if total > 0.0 {
            wicks / total
        } else {
            0.0
        }
    };

    if change_ratio > 0.6 || wick_dominance > 0.65 {
        PriceAction::Choppy
    } else if change_ratio < 0.35 && wick_dominance < 0.45 {
        PriceAction::Clean
    } else {
        PriceAction::Messy
    }
}

/// LOW / MEDIUM / HIGH from ATR ratio and mean bar range.
fn classify_volatility(window: &[Candle], indicators: &IndicatorValues) -> VolatilityLevel {
    let last_close = window.last().map(|c| c.close).unwrap_or(0.0);
    if last_close <= 0.0 {
        return VolatilityLevel::Medium;
    }
    let atr_ratio = indicators.atr.map_or(0.0, |a| a / last_close);
    let mean_range = window.iter().map(Candle::range).sum::<f64>()
        / window.len() as f64
        / last_close;

    if atr_ratio >= 0.009 || mean_range >= 0.012 {
        VolatilityLevel::High
    } else if atr_ratio >= 0.004 || mean_range >= 0.005 {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    }
}

/// Consecutive closes confirming the latest direction.
fn trend_run(window: &[Candle]) -> u32 {
    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    if closes.len() < 2 {
        return 0;
    }

    let last_dir = if closes[closes.len() - 1] > closes[closes.len() - 2] {
        1
    } else if closes[closes.len() - 1] < closes[closes.len() - 2] {
        -1
    } else {
        return 0;
    };

    let mut run = 0u32;
    for w in closes.windows(2).rev() {
        let dir = if w[1] > w[0] {
            1
        } else if w[1] < w[0] {
            -1
        } else {
            0
        };
        if dir == last_dir {
            run += 1;
        } else {
            break;
        }
    }
    run
}

/// At least 60 % of {RSI side, MACD histogram sign, stochastic cross,
/// SuperTrend direction} must agree with the candidate direction.
pub fn momentum_alignment(indicators: &IndicatorValues, direction: Direction) -> bool {
    let up = matches!(direction, Direction::Call);
    let mut checks = 0u32;
    let mut aligned = 0u32;

    if let Some(rsi) = indicators.rsi {
        checks += 1;
        if (rsi > 50.0) == up {
            aligned += 1;
        }
    }
    if let Some(macd) = indicators.macd {
        checks += 1;
        if (macd.histogram > 0.0) == up {
            aligned += 1;
        }
    }
    if let Some(stoch) = indicators.stochastic {
        checks += 1;
        if (stoch.k > stoch.d) == up {
            aligned += 1;
        }
    }
    if let Some(st) = indicators.supertrend {
        checks += 1;
        if (st.direction == TrendDirection::Up) == up {
            aligned += 1;
        }
    }

    checks > 0 && aligned as f64 / checks as f64 >= 0.6
}
