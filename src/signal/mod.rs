// =============================================================================
// Signal Pipeline — result types, options, and the generation engine
// =============================================================================

pub mod brain;
pub mod engine;
pub mod votes;

pub use engine::SignalEngine;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorValues;
use crate::market_data::Candle;
use crate::ml::{FeatureSnapshot, MlVerdict};
use crate::patterns::PsychologyAnalysis;
use crate::types::{Direction, Vote};

/// Per-session configuration for signal generation. Parsed strictly: unknown
/// keys are rejected at the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SignalOptions {
    /// When present, only these indicators may vote.
    pub enabled_indicators: Option<HashSet<String>>,
    /// Per-indicator weight multipliers layered over the default table.
    pub custom_weights: HashMap<String, f64>,
    /// Override for the volatility veto score threshold.
    pub volatility_threshold: Option<f64>,
    /// IANA timezone for rendering timestamps at the UI boundary.
    pub timezone: Option<String>,
    /// Minimum confidence the user wants delivered: 80, 90 or 95.
    pub confidence_filter: Option<u8>,
}

impl SignalOptions {
    /// Whether an indicator may vote under the enable-list.
    pub fn indicator_enabled(&self, name: &str) -> bool {
        match &self.enabled_indicators {
            Some(set) => set.contains(name),
            None => true,
        }
    }

    /// Config multiplier for an indicator's vote weight.
    pub fn weight_for(&self, name: &str) -> f64 {
        self.custom_weights.get(name).copied().unwrap_or(1.0)
    }
}

/// The complete output of one `generate` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub session_id: String,
    pub symbol: String,
    /// Timeframe in seconds.
    pub timeframe: i64,
    /// Wall-clock epoch seconds when the signal was produced.
    pub timestamp: i64,
    /// Start epoch of the candle whose close triggered this signal, plus its
    /// duration — i.e. the moment the candle closed.
    pub candle_close_time: i64,
    pub direction: Direction,
    /// Calibrated confidence in [0, 100].
    pub confidence: f64,
    pub p_up: f64,
    pub p_down: f64,
    pub votes: Vec<Vote>,
    pub indicators: IndicatorValues,
    pub psychology: PsychologyAnalysis,
    /// True when a volatility / regime / ML veto forced NO_TRADE.
    pub volatility_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility_reason: Option<String>,
    pub closed_candles_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forming_candle: Option<Candle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    /// Populated on low-confidence NO_TRADE results: the side the pipeline
    /// leaned toward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_direction: Option<Direction>,
    pub is_low_confidence: bool,
    /// Feature snapshot carried into the pending signal so the expiry-time
    /// model update sees the exact inputs behind this signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml: Option<MlVerdict>,
}

impl SignalResult {
    /// A NO_TRADE shell carrying whatever context is available.
    pub fn no_trade(
        session_id: &str,
        symbol: &str,
        timeframe: i64,
        timestamp: i64,
        candle_close_time: i64,
        closed_candles_count: usize,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            candle_close_time,
            direction: Direction::NoTrade,
            confidence: 0.0,
            p_up: 0.5,
            p_down: 0.5,
            votes: Vec::new(),
            indicators: IndicatorValues::default(),
            psychology: PsychologyAnalysis::default(),
            volatility_override: false,
            volatility_reason: None,
            closed_candles_count,
            forming_candle: None,
            entry_price: None,
            suggested_direction: None,
            is_low_confidence: false,
            features: None,
            ml: None,
        }
    }

    pub fn with_override(mut self, reason: impl Into<String>) -> Self {
        self.volatility_override = true;
        self.volatility_reason = Some(reason.into());
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_allows_everything() {
        let options = SignalOptions::default();
        assert!(options.indicator_enabled("rsi"));
        assert_eq!(options.weight_for("rsi"), 1.0);
    }

    #[test]
    fn enable_list_filters() {
        let mut set = HashSet::new();
        set.insert("rsi".to_string());
        let options = SignalOptions {
            enabled_indicators: Some(set),
            ..Default::default()
        };
        assert!(options.indicator_enabled("rsi"));
        assert!(!options.indicator_enabled("macd"));
    }

    #[test]
    fn unknown_keys_rejected_at_parse() {
        let json = r#"{"confidence_filter": 90, "bogus_key": true}"#;
        assert!(serde_json::from_str::<SignalOptions>(json).is_err());

        let ok = r#"{"confidence_filter": 90, "timezone": "UTC"}"#;
        let options: SignalOptions = serde_json::from_str(ok).unwrap();
        assert_eq!(options.confidence_filter, Some(90));
    }

    #[test]
    fn no_trade_shell_is_neutral() {
        let result = SignalResult::no_trade("s1", "R_100", 60, 1_000, 960, 49);
        assert_eq!(result.direction, Direction::NoTrade);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.closed_candles_count, 49);
        assert!(!result.volatility_override);

        let vetoed = result.with_override("Extreme volatility");
        assert!(vetoed.volatility_override);
        assert_eq!(vetoed.volatility_reason.as_deref(), Some("Extreme volatility"));
    }
}
