// =============================================================================
// Indicator Vote Rules — crosses and thresholds over the indicator snapshot
// =============================================================================
//
// Every rule emits at most one vote. A rule's base weight scales with the
// magnitude of its signal (a hard cross counts for more than a drift), then
// gets multiplied by the per-indicator default table and any user override,
// and is filtered by the optional enable-list.
// =============================================================================

use crate::indicators::{IndicatorValues, TrendDirection};
use crate::market_data::Candle;
use crate::types::{Vote, VoteDirection};

use super::SignalOptions;

/// Default per-indicator weight multipliers. Values deliberately stay inside
/// [0.7, 1.5]; the magnitude scaling inside each rule does the rest.
fn default_weight(name: &str) -> f64 {
    match name {
        "ema_cross" => 1.4,
        "ema_stack" => 1.2,
        "ema_ribbon" => 1.0,
        "hull" => 0.9,
        "sma_trend" => 1.0,
        "macd" => 1.3,
        "macd_cross" => 1.5,
        "rsi" => 1.2,
        "rsi_slope" => 0.8,
        "stochastic" => 1.1,
        "supertrend" => 1.5,
        "psar" => 1.0,
        "adx_trend" => 1.1,
        "cci" => 0.9,
        "williams_r" => 0.8,
        "bollinger" => 1.1,
        "keltner" => 0.9,
        "atr_bands" => 0.8,
        "donchian" => 1.0,
        "range_percentile" => 0.7,
        "roc" => 0.9,
        "momentum" => 0.9,
        "ultimate" => 0.8,
        "obv" => 0.8,
        "zscore" => 1.0,
        "linreg" => 0.9,
        "fisher" => 0.9,
        _ => 1.0,
    }
}

/// Collect every indicator vote for the snapshot.
pub fn indicator_votes(
    candles: &[Candle],
    indicators: &IndicatorValues,
    options: &SignalOptions,
) -> Vec<Vote> {
    let last_close = match candles.last() {
        Some(c) => c.close,
        None => return Vec::new(),
    };

    let mut votes = Vec::new();
    let mut push = |name: &str, direction: VoteDirection, raw_weight: f64, reason: String| {
        if !options.indicator_enabled(name) {
            return;
        }
        let weight = raw_weight * default_weight(name) * options.weight_for(name);
        if weight > 0.0 {
            votes.push(Vote::new(name, direction, weight, reason));
        }
    };

    // ── EMA 9/21 cross ──────────────────────────────────────────────────
    if let (Some(e9), Some(e21), Some(p9), Some(p21)) = (
        indicators.ema9,
        indicators.ema21,
        indicators.ema9_prev,
        indicators.ema21_prev,
    ) {
        let crossed_up = p9 <= p21 && e9 > e21;
        let crossed_down = p9 >= p21 && e9 < e21;
        if crossed_up || crossed_down {
            let cross_strength = (e9 - e21).abs() / last_close;
            let weight = (1.0 + cross_strength * 10.0).min(2.5);
            if crossed_up {
                push(
                    "ema_cross",
                    VoteDirection::Up,
                    weight,
                    "EMA9 crossed above EMA21".into(),
                );
            } else {
                push(
                    "ema_cross",
                    VoteDirection::Down,
                    weight,
                    "EMA9 crossed below EMA21".into(),
                );
            }
        }
    }

    // ── EMA stack alignment ─────────────────────────────────────────────
    if let (Some(e5), Some(e9), Some(e21), Some(e50)) = (
        indicators.ema5,
        indicators.ema9,
        indicators.ema21,
        indicators.ema50,
    ) {
        if e5 > e9 && e9 > e21 && e21 > e50 {
            push(
                "ema_stack",
                VoteDirection::Up,
                1.0,
                "full bullish EMA alignment".into(),
            );
        } else if e5 < e9 && e9 < e21 && e21 < e50 {
            push(
                "ema_stack",
                VoteDirection::Down,
                1.0,
                "full bearish EMA alignment".into(),
            );
        }
    }

    // ── Price vs EMA ribbon ─────────────────────────────────────────────
    if let Some(ribbon) = indicators.ema_ribbon {
        if ribbon > 0.0 {
            let distance = (last_close - ribbon) / ribbon;
            if distance.abs() > 0.0005 {
                let weight = (0.7 + distance.abs() * 200.0).min(1.5);
                let (dir, side) = if distance > 0.0 {
                    (VoteDirection::Up, "above")
                } else {
                    (VoteDirection::Down, "below")
                };
                push(
                    "ema_ribbon",
                    dir,
                    weight,
                    format!("price {side} the EMA ribbon"),
                );
            }
        }
    }

    // ── Hull MA ─────────────────────────────────────────────────────────
    if let Some(hull) = indicators.hull9 {
        if last_close > hull {
            push("hull", VoteDirection::Up, 0.8, "price above Hull MA".into());
        } else if last_close < hull {
            push("hull", VoteDirection::Down, 0.8, "price below Hull MA".into());
        }
    }

    // ── SMA trend ───────────────────────────────────────────────────────
    if let (Some(s20), Some(s50)) = (indicators.sma20, indicators.sma50) {
        if s20 > s50 && last_close > s20 {
            push(
                "sma_trend",
                VoteDirection::Up,
                0.9,
                "price above rising SMA structure".into(),
            );
        } else if s20 < s50 && last_close < s20 {
            push(
                "sma_trend",
                VoteDirection::Down,
                0.9,
                "price below falling SMA structure".into(),
            );
        }
    }

    // ── MACD histogram + signal cross ───────────────────────────────────
    if let Some(macd) = indicators.macd {
        if macd.histogram.abs() > 0.0 {
            let weight = (0.8 + (macd.histogram.abs() / last_close) * 5000.0).min(2.0);
            let dir = if macd.histogram > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            push("macd", dir, weight, "MACD histogram bias".into());
        }

        if let Some(prev) = indicators.macd_prev {
            if prev.macd <= prev.signal && macd.macd > macd.signal {
                push(
                    "macd_cross",
                    VoteDirection::Up,
                    1.2,
                    "MACD crossed above signal line".into(),
                );
            } else if prev.macd >= prev.signal && macd.macd < macd.signal {
                push(
                    "macd_cross",
                    VoteDirection::Down,
                    1.2,
                    "MACD crossed below signal line".into(),
                );
            }
        }
    }

    // ── RSI zones and slope ─────────────────────────────────────────────
    if let Some(rsi) = indicators.rsi {
        if rsi <= 30.0 {
            let weight = (1.0 + (30.0 - rsi) / 15.0).min(2.0);
            push(
                "rsi",
                VoteDirection::Up,
                weight,
                format!("RSI oversold at {rsi:.0}"),
            );
        } else if rsi >= 70.0 {
            let weight = (1.0 + (rsi - 70.0) / 15.0).min(2.0);
            push(
                "rsi",
                VoteDirection::Down,
                weight,
                format!("RSI overbought at {rsi:.0}"),
            );
        }

        if let Some(prev) = indicators.rsi_prev {
            let slope = rsi - prev;
            if slope.abs() >= 5.0 && rsi > 35.0 && rsi < 65.0 {
                let dir = if slope > 0.0 {
                    VoteDirection::Up
                } else {
                    VoteDirection::Down
                };
                push(
                    "rsi_slope",
                    dir,
                    0.8,
                    format!("RSI moving {slope:+.0} through the midzone"),
                );
            }
        }
    }

    // ── Stochastic cross in extreme zones ───────────────────────────────
    if let (Some(stoch), Some(prev)) = (indicators.stochastic, indicators.stochastic_prev) {
        let crossed_up = prev.k <= prev.d && stoch.k > stoch.d;
        let crossed_down = prev.k >= prev.d && stoch.k < stoch.d;
        if crossed_up && stoch.k < 30.0 {
            push(
                "stochastic",
                VoteDirection::Up,
                1.2,
                "stochastic bullish cross in oversold zone".into(),
            );
        } else if crossed_down && stoch.k > 70.0 {
            push(
                "stochastic",
                VoteDirection::Down,
                1.2,
                "stochastic bearish cross in overbought zone".into(),
            );
        }
    }

    // ── SuperTrend ──────────────────────────────────────────────────────
    if let Some(st) = indicators.supertrend {
        let distance = (last_close - st.value).abs() / last_close;
        let weight = (1.0 + distance * 20.0).min(1.8);
        match st.direction {
            TrendDirection::Up => push(
                "supertrend",
                VoteDirection::Up,
                weight,
                "SuperTrend riding below price".into(),
            ),
            TrendDirection::Down => push(
                "supertrend",
                VoteDirection::Down,
                weight,
                "SuperTrend capping above price".into(),
            ),
        }
    }

    // ── Parabolic SAR ───────────────────────────────────────────────────
    if let Some(psar) = indicators.psar {
        let dir = if psar.is_uptrend {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        push("psar", dir, 0.9, "Parabolic SAR bias".into());
    }

    // ── ADX-qualified trend ─────────────────────────────────────────────
    if let (Some(adx), Some(e9), Some(e21)) =
        (indicators.adx, indicators.ema9, indicators.ema21)
    {
        if adx >= 25.0 && e9 != e21 {
            let weight = (0.9 + (adx - 25.0) / 50.0).min(1.5);
            let dir = if e9 > e21 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            push(
                "adx_trend",
                dir,
                weight,
                format!("strong trend (ADX {adx:.0})"),
            );
        }
    }

    // ── CCI extremes ────────────────────────────────────────────────────
    if let Some(cci) = indicators.cci {
        if cci >= 150.0 {
            push(
                "cci",
                VoteDirection::Down,
                1.0,
                format!("CCI overextended at {cci:.0}"),
            );
        } else if cci <= -150.0 {
            push(
                "cci",
                VoteDirection::Up,
                1.0,
                format!("CCI overextended at {cci:.0}"),
            );
        }
    }

    // ── Williams %R ─────────────────────────────────────────────────────
    if let Some(wr) = indicators.williams_r {
        if wr <= -80.0 {
            push(
                "williams_r",
                VoteDirection::Up,
                0.9,
                format!("Williams %R oversold at {wr:.0}"),
            );
        } else if wr >= -20.0 {
            push(
                "williams_r",
                VoteDirection::Down,
                0.9,
                format!("Williams %R overbought at {wr:.0}"),
            );
        }
    }

    // ── Bollinger band touches ──────────────────────────────────────────
    if let Some(bb) = indicators.bollinger {
        if last_close >= bb.upper {
            push(
                "bollinger",
                VoteDirection::Down,
                1.1,
                "close at or beyond upper Bollinger band".into(),
            );
        } else if last_close <= bb.lower {
            push(
                "bollinger",
                VoteDirection::Up,
                1.1,
                "close at or beyond lower Bollinger band".into(),
            );
        }
    }

    // ── Keltner breakout ────────────────────────────────────────────────
    if let Some(kc) = indicators.keltner {
        if last_close > kc.upper {
            push(
                "keltner",
                VoteDirection::Up,
                1.0,
                "breakout above the Keltner channel".into(),
            );
        } else if last_close < kc.lower {
            push(
                "keltner",
                VoteDirection::Down,
                1.0,
                "breakdown below the Keltner channel".into(),
            );
        }
    }

    // ── ATR bands stretch ───────────────────────────────────────────────
    if let Some(bands) = indicators.atr_bands {
        if last_close > bands.upper {
            push(
                "atr_bands",
                VoteDirection::Down,
                0.8,
                "price stretched above the ATR envelope".into(),
            );
        } else if last_close < bands.lower {
            push(
                "atr_bands",
                VoteDirection::Up,
                0.8,
                "price stretched below the ATR envelope".into(),
            );
        }
    }

    // ── Donchian breakout ───────────────────────────────────────────────
    if candles.len() >= 21 {
        if let Some(prior) = crate::indicators::channels::calculate_donchian(
            &candles[..candles.len() - 1],
            20,
        ) {
            if last_close > prior.upper {
                push(
                    "donchian",
                    VoteDirection::Up,
                    1.1,
                    "close above the 20-bar high".into(),
                );
            } else if last_close < prior.lower {
                push(
                    "donchian",
                    VoteDirection::Down,
                    1.1,
                    "close below the 20-bar low".into(),
                );
            }
        }
    }

    // ── Range percentile extremes ───────────────────────────────────────
    if let Some(pct) = indicators.range_percentile {
        if pct >= 0.9 {
            push(
                "range_percentile",
                VoteDirection::Down,
                0.8,
                "price at the top of its 20-bar range".into(),
            );
        } else if pct <= 0.1 {
            push(
                "range_percentile",
                VoteDirection::Up,
                0.8,
                "price at the bottom of its 20-bar range".into(),
            );
        }
    }

    // ── ROC / Momentum ──────────────────────────────────────────────────
    if let Some(roc) = indicators.roc {
        if roc.abs() >= 0.2 {
            let dir = if roc > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            let weight = (0.7 + roc.abs() * 0.1).min(1.4);
            push("roc", dir, weight, format!("ROC at {roc:+.2}%"));
        }
    }
    if let Some(momentum) = indicators.momentum {
        let relative = momentum / last_close;
        if relative.abs() >= 0.001 {
            let dir = if momentum > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            push("momentum", dir, 0.8, "10-bar momentum bias".into());
        }
    }

    // ── Ultimate Oscillator ─────────────────────────────────────────────
    if let Some(uo) = indicators.ultimate {
        if uo <= 30.0 {
            push(
                "ultimate",
                VoteDirection::Up,
                0.9,
                format!("Ultimate Oscillator oversold at {uo:.0}"),
            );
        } else if uo >= 70.0 {
            push(
                "ultimate",
                VoteDirection::Down,
                0.9,
                format!("Ultimate Oscillator overbought at {uo:.0}"),
            );
        }
    }

    // ── OBV slope ───────────────────────────────────────────────────────
    if let (Some(obv), Some(prev)) = (indicators.obv, indicators.obv_prev) {
        if obv > prev {
            push("obv", VoteDirection::Up, 0.7, "volume flowing in".into());
        } else if obv < prev {
            push("obv", VoteDirection::Down, 0.7, "volume flowing out".into());
        }
    }

    // ── Mean-reversion z-score ──────────────────────────────────────────
    if let Some(z) = indicators.zscore {
        if z >= 2.0 {
            let weight = (0.9 + (z - 2.0) * 0.3).min(1.6);
            push(
                "zscore",
                VoteDirection::Down,
                weight,
                format!("price stretched {z:.1} sigma above its mean"),
            );
        } else if z <= -2.0 {
            let weight = (0.9 + (-z - 2.0) * 0.3).min(1.6);
            push(
                "zscore",
                VoteDirection::Up,
                weight,
                format!("price stretched {z:.1} sigma below its mean"),
            );
        }
    }

    // ── Linear-regression slope ─────────────────────────────────────────
    if let Some(slope) = indicators.linreg_slope {
        let relative = slope / last_close;
        if relative.abs() >= 0.0003 {
            let dir = if slope > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            let weight = (0.7 + relative.abs() * 500.0).min(1.4);
            push("linreg", dir, weight, "regression slope bias".into());
        }
    }

    // ── Fisher transform cross ──────────────────────────────────────────
    if let (Some(fisher), Some(prev)) = (indicators.fisher, indicators.fisher_prev) {
        if fisher > prev && fisher < -1.5 {
            push(
                "fisher",
                VoteDirection::Up,
                1.0,
                "Fisher turning up from an extreme".into(),
            );
        } else if fisher < prev && fisher > 1.5 {
            push(
                "fisher",
                VoteDirection::Down,
                1.0,
                "Fisher turning down from an extreme".into(),
            );
        }
    }

    votes
}
