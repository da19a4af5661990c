// =============================================================================
// Rule Context — market / execution snapshot the safety rules read
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{ShieldState, VolatilityLevel};

/// Assembled by the market, risk and threat subsystems before each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleContext {
    /// Bid-ask spread in basis points.
    #[serde(default)]
    pub spread_bps: f64,

    /// Realised volatility, percent.
    #[serde(default)]
    pub volatility_pct: f64,

    /// Visible book depth near the touch, quote currency.
    #[serde(default)]
    pub liquidity_usd: f64,

    /// Raised to the shield layer's state by the orchestrator when stricter.
    #[serde(default)]
    pub shield_state: ShieldState,

    /// Proposed position size, units.
    #[serde(default)]
    pub position_size: f64,

    /// Aggregate threat level, 0–100.
    #[serde(default)]
    pub threat_level: f64,

    /// Number of conflicting layer pairs. The orchestrator overwrites this
    /// with the merger's count before evaluating.
    #[serde(default)]
    pub conflict_count: usize,

    /// Gap between last trade and reference price, percent.
    #[serde(default)]
    pub price_gap_pct: f64,
}

impl RuleContext {
    pub fn volatility_level(&self) -> VolatilityLevel {
        VolatilityLevel::from_pct(self.volatility_pct)
    }

    pub fn with_conflict_count(mut self, conflicts: usize) -> Self {
        self.conflict_count = conflicts;
        self
    }

    /// Raise the shield state to `layer` if the shield layer is stricter.
    /// The context never relaxes a shield the layer reports.
    pub fn with_shield_floor(mut self, layer: Option<ShieldState>) -> Self {
        if let Some(layer) = layer {
            self.shield_state = self.shield_state.max(layer);
        }
        self
    }
}

impl Default for RuleContext {
    fn default() -> Self {
        Self {
            spread_bps: 0.0,
            volatility_pct: 0.0,
            liquidity_usd: 0.0,
            shield_state: ShieldState::Calm,
            position_size: 0.0,
            threat_level: 0.0,
            conflict_count: 0,
            price_gap_pct: 0.0,
        }
    }
}
