// =============================================================================
// Pattern Engine — candlestick, chart and harmonic detection
// =============================================================================
//
// Three pure sub-detectors, each producing weighted directional votes, plus
// the psychology read that summarizes the current window's micro-structure.
// All detectors are deterministic and idempotent on the same input.

pub mod candlestick;
pub mod chart;
pub mod harmonic;
pub mod psychology;

pub use psychology::{Bias, PsychologyAnalysis};

use crate::market_data::Candle;
use crate::types::Vote;

/// Votes plus psychology for one candle window.
#[derive(Debug, Clone, Default)]
pub struct PatternScan {
    pub votes: Vec<Vote>,
    pub psychology: PsychologyAnalysis,
}

/// Run every pattern detector over the window (oldest first, forming candle
/// allowed as the tail).
pub fn scan(candles: &[Candle]) -> PatternScan {
    let mut votes = candlestick::detect(candles);
    votes.extend(chart::detect(candles));
    votes.extend(harmonic::detect(candles));

    let psychology = psychology::analyze(candles, &votes);

    PatternScan { votes, psychology }
}
