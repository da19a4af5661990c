// =============================================================================
// Consolidator — required-engine coverage and consensus
// =============================================================================
//
// A synthesized failure still counts as "responded" for coverage; its vote
// is a rejection. Results depend only on the set of responses, never on the
// order they arrived in: required engines are walked in topology order.
// =============================================================================

use serde::Serialize;

use crate::routing::broadcaster::ResponseMap;
use crate::routing::engine::EngineId;
use crate::routing::topology::RoutingRule;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consolidation {
    pub required_engines: Vec<EngineId>,
    pub responded_engines: Vec<EngineId>,
    pub missing_engines: Vec<EngineId>,
    /// Approvals among required responses.
    pub approvals: usize,
    /// Rejections among required responses.
    pub rejections: usize,
    /// Whether consensus was demanded for this signal's tier.
    pub consensus_required: bool,
    /// Majority reached among required responses. Always true when not
    /// demanded.
    pub consensus: bool,
}

impl Consolidation {
    pub fn has_missing(&self) -> bool {
        !self.missing_engines.is_empty()
    }
}

/// Minimum approvals for consensus among `n` required responses: ceil(n/2).
pub fn consensus_threshold(n: usize) -> usize {
    n.div_ceil(2)
}

pub fn consolidate(responses: &ResponseMap, rule: &RoutingRule) -> Consolidation {
    let mut responded = Vec::new();
    let mut missing = Vec::new();
    let mut approvals = 0usize;
    let mut rejections = 0usize;

    for engine in &rule.required_engines {
        match responses.get(engine) {
            Some(resp) => {
                responded.push(engine.clone());
                if resp.approved {
                    approvals += 1;
                } else {
                    rejections += 1;
                }
            }
            None => missing.push(engine.clone()),
        }
    }

    let consensus = if rule.require_consensus {
        let n = responded.len();
        n > 0 && approvals >= consensus_threshold(n)
    } else {
        true
    };

    Consolidation {
        required_engines: rule.required_engines.clone(),
        responded_engines: responded,
        missing_engines: missing,
        approvals,
        rejections,
        consensus_required: rule.require_consensus,
        consensus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::broadcaster::tests::rule_for;
    use crate::routing::engine::EngineResponse;
    use chrono::Utc;
    use std::collections::HashSet;

    fn resp(engine: &str, approved: bool) -> EngineResponse {
        EngineResponse {
            engine: EngineId::from(engine),
            approved,
            confidence: 50.0,
            reasoning: String::new(),
            processing_time_ms: 1,
            timestamp: Utc::now(),
            modifications: None,
            synthetic: false,
        }
    }

    fn map(entries: &[(&str, bool)]) -> ResponseMap {
        entries
            .iter()
            .map(|(e, a)| (EngineId::from(*e), resp(e, *a)))
            .collect()
    }

    #[test]
    fn threshold_is_ceiling_of_half() {
        assert_eq!(consensus_threshold(1), 1);
        assert_eq!(consensus_threshold(3), 2);
        assert_eq!(consensus_threshold(4), 2);
        assert_eq!(consensus_threshold(5), 3);
    }

    #[test]
    fn four_required_two_approvals_reach_consensus() {
        let rule = rule_for(&["a", "b", "c", "d"], &["a", "b", "c", "d"], 100, true);
        let two = consolidate(&map(&[("a", true), ("b", true), ("c", false), ("d", false)]), &rule);
        assert!(two.consensus);
        let one = consolidate(&map(&[("a", true), ("b", false), ("c", false), ("d", false)]), &rule);
        assert!(!one.consensus);
    }

    #[test]
    fn coverage_partitions_required_engines() {
        let rule = rule_for(&["a", "b", "c", "x"], &["a", "b", "c"], 100, false);
        let c = consolidate(&map(&[("a", true), ("c", false), ("x", true)]), &rule);

        assert_eq!(c.missing_engines, vec![EngineId::from("b")]);
        let responded: HashSet<_> = c.responded_engines.iter().cloned().collect();
        let missing: HashSet<_> = c.missing_engines.iter().cloned().collect();
        assert!(responded.is_disjoint(&missing));
        let union: HashSet<_> = responded.union(&missing).cloned().collect();
        let required: HashSet<_> = rule.required_engines.iter().cloned().collect();
        assert_eq!(union, required);
        // Optional engine x does not vote.
        assert_eq!((c.approvals, c.rejections), (1, 1));
    }

    #[test]
    fn consensus_not_demanded_is_vacuously_true() {
        let rule = rule_for(&["a"], &["a"], 100, false);
        let c = consolidate(&map(&[("a", false)]), &rule);
        assert!(c.consensus);
        assert!(!c.consensus_required);
    }
}
