// =============================================================================
// Routing Topology — static signal type → tier / engines / policy table
// =============================================================================
//
// The table must be total: every SignalType has exactly one entry. A topology
// missing entries is refused at construction time, and every lookup of an
// unmapped type is an error rather than a silent default.
//
// Priority bands (inclusive):
//   CRITICAL_THREAT  90–100
//   OPPORTUNITY      50–89
//   LEARNING         10–49
// Within a band each signal type carries a fixed offset from the band base.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::routing::engine::EngineId;
use crate::routing::signal::{SignalType, Tier};

/// Routing policy for one signal type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub tier: Tier,
    pub target_engines: Vec<EngineId>,
    /// Subset of `target_engines` whose response is mandatory.
    pub required_engines: Vec<EngineId>,
    pub timeout_ms: u64,
    pub require_consensus: bool,
    pub priority_offset: u8,
}

impl RoutingRule {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn priority(&self) -> u8 {
        self.tier.base_priority().saturating_add(self.priority_offset)
    }

    fn validate(&self, signal_type: SignalType) -> CoreResult<()> {
        let invalid = |message: String| CoreError::InvalidTopology {
            signal_type: signal_type.to_string(),
            message,
        };

        if self.target_engines.is_empty() {
            return Err(invalid("no target engines".into()));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout must be positive".into()));
        }
        if let Some(stray) = self
            .required_engines
            .iter()
            .find(|e| !self.target_engines.contains(e))
        {
            return Err(invalid(format!("required engine {stray} is not a target")));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.target_engines.iter().find(|e| !seen.insert(*e)) {
            return Err(invalid(format!("engine {dup} listed twice")));
        }
        let priority = self.priority();
        if priority > tier_ceiling(self.tier) {
            return Err(invalid(format!(
                "priority {} exceeds the {} band",
                priority, self.tier
            )));
        }
        Ok(())
    }
}

fn tier_ceiling(tier: Tier) -> u8 {
    match tier {
        Tier::CriticalThreat => 100,
        Tier::Opportunity => 89,
        Tier::Learning => 49,
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    rules: HashMap<SignalType, RoutingRule>,
}

impl Topology {
    /// Build a topology, refusing tables that are not total or not coherent.
    pub fn new(rules: HashMap<SignalType, RoutingRule>) -> CoreResult<Self> {
        let missing: Vec<String> = SignalType::ALL
            .iter()
            .filter(|t| !rules.contains_key(t))
            .map(|t| t.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::IncompleteTopology(missing));
        }
        for (signal_type, rule) in &rules {
            rule.validate(*signal_type)?;
        }
        Ok(Self { rules })
    }

    /// The production routing table.
    pub fn standard() -> Self {
        let mut rules = HashMap::new();

        // ── Critical threats: fast, no consensus ────────────────────────
        rules.insert(
            SignalType::FlashCrash,
            rule(
                Tier::CriticalThreat,
                &["threat_detector", "shield_guard", "risk_sentinel", "liquidity_monitor"],
                &["threat_detector", "shield_guard"],
                250,
                false,
                10,
            ),
        );
        rules.insert(
            SignalType::LiquidityDrain,
            rule(
                Tier::CriticalThreat,
                &["liquidity_monitor", "threat_detector", "shield_guard"],
                &["liquidity_monitor", "shield_guard"],
                250,
                false,
                8,
            ),
        );
        rules.insert(
            SignalType::ManipulationDetected,
            rule(
                Tier::CriticalThreat,
                &["threat_detector", "risk_sentinel", "shield_guard"],
                &["threat_detector", "risk_sentinel"],
                250,
                false,
                6,
            ),
        );
        rules.insert(
            SignalType::ExchangeAnomaly,
            rule(
                Tier::CriticalThreat,
                &["threat_detector", "risk_sentinel"],
                &["threat_detector"],
                250,
                false,
                4,
            ),
        );

        // ── Opportunities: majority consensus mandatory ─────────────────
        rules.insert(
            SignalType::ArbitrageGap,
            rule(
                Tier::Opportunity,
                &["strategy_core", "timing_gate", "liquidity_monitor", "risk_sentinel"],
                &["timing_gate", "liquidity_monitor", "risk_sentinel"],
                500,
                true,
                35,
            ),
        );
        rules.insert(
            SignalType::Breakout,
            rule(
                Tier::Opportunity,
                &["strategy_core", "fusion_scorer", "timing_gate", "risk_sentinel", "pattern_learner"],
                &["strategy_core", "fusion_scorer", "timing_gate", "risk_sentinel"],
                1000,
                true,
                30,
            ),
        );
        rules.insert(
            SignalType::MomentumShift,
            rule(
                Tier::Opportunity,
                &["strategy_core", "fusion_scorer", "timing_gate", "risk_sentinel"],
                &["strategy_core", "fusion_scorer", "timing_gate"],
                1000,
                true,
                25,
            ),
        );
        rules.insert(
            SignalType::VolumeSpike,
            rule(
                Tier::Opportunity,
                &["fusion_scorer", "timing_gate", "liquidity_monitor"],
                &["fusion_scorer", "liquidity_monitor"],
                1000,
                true,
                15,
            ),
        );

        // ── Learning: slow, advisory ────────────────────────────────────
        rules.insert(
            SignalType::PatternDiscovered,
            rule(
                Tier::Learning,
                &["pattern_learner", "memory_bank", "strategy_core"],
                &["pattern_learner"],
                5000,
                false,
                20,
            ),
        );
        rules.insert(
            SignalType::ModelUpdate,
            rule(
                Tier::Learning,
                &["pattern_learner", "strategy_core", "memory_bank"],
                &["pattern_learner", "strategy_core"],
                5000,
                false,
                15,
            ),
        );
        rules.insert(
            SignalType::PerformanceReview,
            rule(
                Tier::Learning,
                &["memory_bank", "pattern_learner"],
                &["memory_bank"],
                5000,
                false,
                5,
            ),
        );

        Self { rules }
    }

    pub fn routing_rule_of(&self, signal_type: SignalType) -> CoreResult<&RoutingRule> {
        self.rules
            .get(&signal_type)
            .ok_or_else(|| CoreError::UnmappedSignalType(signal_type.to_string()))
    }

    pub fn tier_of(&self, signal_type: SignalType) -> CoreResult<Tier> {
        self.routing_rule_of(signal_type).map(|r| r.tier)
    }

    pub fn priority_of(&self, signal_type: SignalType) -> CoreResult<u8> {
        self.routing_rule_of(signal_type).map(|r| r.priority())
    }

    /// Signal types assigned to `tier`, sorted.
    pub fn signal_types_in(&self, tier: Tier) -> Vec<SignalType> {
        let mut types: Vec<SignalType> = self
            .rules
            .iter()
            .filter(|(_, r)| r.tier == tier)
            .map(|(t, _)| *t)
            .collect();
        types.sort();
        types
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::standard()
    }
}

fn rule(
    tier: Tier,
    targets: &[&str],
    required: &[&str],
    timeout_ms: u64,
    require_consensus: bool,
    priority_offset: u8,
) -> RoutingRule {
    RoutingRule {
        tier,
        target_engines: targets.iter().map(|e| EngineId::from(*e)).collect(),
        required_engines: required.iter().map(|e| EngineId::from(*e)).collect(),
        timeout_ms,
        require_consensus,
        priority_offset,
    }
}
