// =============================================================================
// Signals — discrete events submitted to the router
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Priority class of a signal. Fixed per signal type by the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    CriticalThreat,
    Opportunity,
    Learning,
}

impl Tier {
    /// Lowest priority of the tier's band. Offsets are added per signal type.
    pub fn base_priority(self) -> u8 {
        match self {
            Self::CriticalThreat => 90,
            Self::Opportunity => 50,
            Self::Learning => 10,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CriticalThreat => write!(f, "CRITICAL_THREAT"),
            Self::Opportunity => write!(f, "OPPORTUNITY"),
            Self::Learning => write!(f, "LEARNING"),
        }
    }
}

/// Every signal type the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    // Critical threats
    FlashCrash,
    LiquidityDrain,
    ManipulationDetected,
    ExchangeAnomaly,
    // Opportunities
    Breakout,
    MomentumShift,
    ArbitrageGap,
    VolumeSpike,
    // Learning
    PatternDiscovered,
    ModelUpdate,
    PerformanceReview,
}

impl SignalType {
    pub const ALL: [SignalType; 11] = [
        Self::FlashCrash,
        Self::LiquidityDrain,
        Self::ManipulationDetected,
        Self::ExchangeAnomaly,
        Self::Breakout,
        Self::MomentumShift,
        Self::ArbitrageGap,
        Self::VolumeSpike,
        Self::PatternDiscovered,
        Self::ModelUpdate,
        Self::PerformanceReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlashCrash => "FLASH_CRASH",
            Self::LiquidityDrain => "LIQUIDITY_DRAIN",
            Self::ManipulationDetected => "MANIPULATION_DETECTED",
            Self::ExchangeAnomaly => "EXCHANGE_ANOMALY",
            Self::Breakout => "BREAKOUT",
            Self::MomentumShift => "MOMENTUM_SHIFT",
            Self::ArbitrageGap => "ARBITRAGE_GAP",
            Self::VolumeSpike => "VOLUME_SPIKE",
            Self::PatternDiscovered => "PATTERN_DISCOVERED",
            Self::ModelUpdate => "MODEL_UPDATE",
            Self::PerformanceReview => "PERFORMANCE_REVIEW",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| CoreError::UnmappedSignalType(s.to_string()))
    }
}

/// An event in transit. Built once by the router and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub payload: serde_json::Value,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_types_case_insensitively() {
        assert_eq!("breakout".parse::<SignalType>().unwrap(), SignalType::Breakout);
        assert_eq!(
            " FLASH_CRASH ".parse::<SignalType>().unwrap(),
            SignalType::FlashCrash
        );
    }

    #[test]
    fn parse_unknown_type_is_an_error() {
        let err = "SOLAR_FLARE".parse::<SignalType>().unwrap_err();
        assert_eq!(err, CoreError::UnmappedSignalType("SOLAR_FLARE".into()));
    }

    #[test]
    fn serde_name_matches_display() {
        for t in SignalType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t));
        }
    }
}
