// =============================================================================
// Final Decision — verdict derivation for one routed signal
// =============================================================================
//
// Precedence (first match wins):
//   1. any required engine missing          → DEFER
//   2. consensus demanded but not reached   → REJECT
//   3. approvals vs rejections (required)   → APPROVE / REJECT
//      tie                                  → MODIFY if any response carries
//                                             modifications, else DEFER
//
// Confidence is the mean over all responses, required and optional.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::routing::consolidator::Consolidation;
use crate::routing::engine::{EngineId, EngineResponse};
use crate::routing::signal::{SignalType, Tier};
use crate::types::Reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteVerdict {
    Approve,
    Reject,
    Modify,
    Defer,
}

impl std::fmt::Display for RouteVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
            Self::Modify => write!(f, "MODIFY"),
            Self::Defer => write!(f, "DEFER"),
        }
    }
}

/// Router output for one signal. Built once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalDecision {
    pub signal_id: String,
    pub signal_type: SignalType,
    pub decision: RouteVerdict,
    pub confidence: f64,
    pub tier: Tier,
    /// Every target engine's response, in topology order.
    pub responses: Vec<EngineResponse>,
    pub required_engines: Vec<EngineId>,
    pub responded_engines: Vec<EngineId>,
    pub missing_engines: Vec<EngineId>,
    pub consensus: bool,
    pub processing_time_ms: u64,
    pub reasoning: Vec<Reason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<serde_json::Value>,
}

/// Verdict, confidence and trail derived from a consolidation.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub decision: RouteVerdict,
    pub confidence: f64,
    pub reasoning: Vec<Reason>,
    pub modifications: Option<serde_json::Value>,
}

/// Derive the verdict. `responses` must be in a deterministic order (the
/// router passes them in topology order).
pub fn derive(consolidation: &Consolidation, responses: &[EngineResponse]) -> Derivation {
    let mut reasoning = Vec::new();
    let mut modifications = None;

    let decision = if consolidation.has_missing() {
        let names: Vec<&str> = consolidation
            .missing_engines
            .iter()
            .map(|e| e.as_str())
            .collect();
        reasoning.push(Reason::new(
            "missing_required_engines",
            format!("missing required engines: {}", names.join(", ")),
        ));
        RouteVerdict::Defer
    } else if consolidation.consensus_required && !consolidation.consensus {
        reasoning.push(Reason::new(
            "consensus_not_reached",
            format!(
                "consensus not reached: {} of {} required engines approved",
                consolidation.approvals,
                consolidation.responded_engines.len()
            ),
        ));
        RouteVerdict::Reject
    } else if consolidation.approvals > consolidation.rejections {
        reasoning.push(Reason::new(
            "majority_approve",
            format!(
                "approvals {} > rejections {}",
                consolidation.approvals, consolidation.rejections
            ),
        ));
        RouteVerdict::Approve
    } else if consolidation.rejections > consolidation.approvals {
        reasoning.push(Reason::new(
            "majority_reject",
            format!(
                "rejections {} > approvals {}",
                consolidation.rejections, consolidation.approvals
            ),
        ));
        RouteVerdict::Reject
    } else {
        modifications = responses.iter().find_map(|r| r.modifications.clone());
        if modifications.is_some() {
            reasoning.push(Reason::new(
                "tie_with_modifications",
                format!(
                    "tie at {} each; modification proposed",
                    consolidation.approvals
                ),
            ));
            RouteVerdict::Modify
        } else {
            reasoning.push(Reason::new(
                "tie",
                format!("tie at {} each; no modification proposed", consolidation.approvals),
            ));
            RouteVerdict::Defer
        }
    };

    for r in responses {
        reasoning.push(Reason::new(
            format!("engine:{}", r.engine),
            r.reasoning.clone(),
        ));
    }

    Derivation {
        decision,
        confidence: mean_confidence(responses),
        reasoning,
        modifications,
    }
}

fn mean_confidence(responses: &[EngineResponse]) -> f64 {
    if responses.is_empty() {
        return 0.0;
    }
    responses.iter().map(|r| r.confidence).sum::<f64>() / responses.len() as f64
}
