// =============================================================================
// Shared types used across the signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Final directional decision attached to every published signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Call,
    Put,
    NoTrade,
}

impl Direction {
    /// The opposite directional call. `NoTrade` has no opposite.
    pub fn opposite(self) -> Self {
        match self {
            Self::Call => Self::Put,
            Self::Put => Self::Call,
            Self::NoTrade => Self::NoTrade,
        }
    }

    pub fn is_directional(self) -> bool {
        !matches!(self, Self::NoTrade)
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::NoTrade
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
            Self::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

/// The opinion of a single indicator or strategy head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteDirection {
    Up,
    Down,
    Neutral,
}

impl VoteDirection {
    pub fn flip(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Neutral => Self::Neutral,
        }
    }

    /// The trade direction this vote argues for.
    pub fn as_direction(self) -> Direction {
        match self {
            Self::Up => Direction::Call,
            Self::Down => Direction::Put,
            Self::Neutral => Direction::NoTrade,
        }
    }
}

impl std::fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// A single weighted directional opinion in the voting pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// Name of the indicator or strategy that produced this vote.
    pub indicator: String,
    pub direction: VoteDirection,
    /// Dimensionless weight, typically in 0.2–2.5.
    pub weight: f64,
    /// Human-readable justification shown to the user.
    pub reason: String,
}

impl Vote {
    pub fn new(
        indicator: impl Into<String>,
        direction: VoteDirection,
        weight: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            indicator: indicator.into(),
            direction,
            weight: weight.max(0.0),
            reason: reason.into(),
        }
    }
}

/// Resolution of a directional signal at expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Win => write!(f, "WIN"),
            Self::Loss => write!(f, "LOSS"),
        }
    }
}

/// Coarse confidence class assigned by the ML ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Premium,
    Standard,
    Low,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premium => write!(f, "PREMIUM"),
            Self::Standard => write!(f, "STANDARD"),
            Self::Low => write!(f, "LOW"),
        }
    }
}
