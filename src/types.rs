// =============================================================================
// Shared types used across the decision core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Directional verdict produced by a decision layer or by the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
    Wait,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Wait
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

/// State of the defensive shield layer, ordered from relaxed to locked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShieldState {
    Calm,
    AggroObs,
    Protective,
    Defensive,
}

impl ShieldState {
    /// Whether the shield forbids new executions outright.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Defensive)
    }

    /// Risk-score contribution of the shield tier.
    pub fn risk_points(self) -> f64 {
        match self {
            Self::Defensive => 15.0,
            Self::Protective => 10.0,
            Self::AggroObs => 5.0,
            Self::Calm => 0.0,
        }
    }
}

impl Default for ShieldState {
    fn default() -> Self {
        Self::Calm
    }
}

impl std::fmt::Display for ShieldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calm => write!(f, "CALM"),
            Self::AggroObs => write!(f, "AGGRO_OBS"),
            Self::Protective => write!(f, "PROTECTIVE"),
            Self::Defensive => write!(f, "DEFENSIVE"),
        }
    }
}

/// Coarse volatility bucket derived from realised volatility (percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityLevel {
    /// Bucket a realised volatility percentage.
    ///
    /// Bands: `< 1.5` low, `< 3.0` medium, `< 5.0` high, otherwise extreme.
    pub fn from_pct(volatility_pct: f64) -> Self {
        if volatility_pct >= 5.0 {
            Self::Extreme
        } else if volatility_pct >= 3.0 {
            Self::High
        } else if volatility_pct >= 1.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Risk-score contribution of the volatility tier.
    pub fn risk_points(self) -> f64 {
        match self {
            Self::Extreme => 15.0,
            Self::High => 10.0,
            Self::Medium => 5.0,
            Self::Low => 0.0,
        }
    }
}

impl std::fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// One entry of a decision trail: a stable machine code plus readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: String,
    pub message: String,
}

impl Reason {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Render a structured trail as plain lines, in order.
pub fn render_reasons(reasons: &[Reason]) -> Vec<String> {
    reasons.iter().map(|r| r.to_string()).collect()
}
