// =============================================================================
// Router — single entry point for routed signals
// =============================================================================
//
// route(type, payload):
//   1. Look up the routing rule (unmapped type → error)
//   2. Build the immutable Signal (priority from the topology)
//   3. Broadcast to target engines under the tier deadline
//   4. Consolidate against the required-engine subset
//   5. Derive the verdict and assemble the FinalDecision
//
// The router keeps no per-signal state. Its only shared mutation is the
// rolling counters, which use relaxed atomics.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::routing::broadcaster::Broadcaster;
use crate::routing::consolidator::consolidate;
use crate::routing::decision::{derive, FinalDecision, RouteVerdict};
use crate::routing::engine::{EngineRegistry, EngineResponse};
use crate::routing::signal::{Signal, SignalType};
use crate::routing::topology::Topology;
use crate::types::render_reasons;

/// Optional context attached to a routed signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalOrigin {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    approved: AtomicU64,
    rejected: AtomicU64,
    modified: AtomicU64,
    deferred: AtomicU64,
    consensus_failures: AtomicU64,
    synthetic_responses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub approved: u64,
    pub rejected: u64,
    pub modified: u64,
    pub deferred: u64,
    pub consensus_failures: u64,
    pub synthetic_responses: u64,
}

impl RouterStats {
    fn record(&self, decision: &FinalDecision, consensus_failed: bool) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        let counter = match decision.decision {
            RouteVerdict::Approve => &self.approved,
            RouteVerdict::Reject => &self.rejected,
            RouteVerdict::Modify => &self.modified,
            RouteVerdict::Defer => &self.deferred,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if consensus_failed {
            self.consensus_failures.fetch_add(1, Ordering::Relaxed);
        }
        let synthetic = decision.responses.iter().filter(|r| r.synthetic).count() as u64;
        self.synthetic_responses.fetch_add(synthetic, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            approved: self.approved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            consensus_failures: self.consensus_failures.load(Ordering::Relaxed),
            synthetic_responses: self.synthetic_responses.load(Ordering::Relaxed),
        }
    }
}

pub struct Router {
    topology: Arc<Topology>,
    broadcaster: Broadcaster,
    stats: RouterStats,
}

impl Router {
    pub fn new(topology: Arc<Topology>, registry: Arc<EngineRegistry>) -> Self {
        info!(engines = registry.len(), "Router initialised");
        Self {
            topology,
            broadcaster: Broadcaster::new(registry),
            stats: RouterStats::default(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        self.broadcaster.registry()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn route(
        &self,
        signal_type: SignalType,
        payload: serde_json::Value,
    ) -> CoreResult<FinalDecision> {
        self.route_with_origin(signal_type, payload, SignalOrigin::default())
            .await
    }

    /// Route a signal named by its wire string. Unknown names are an error.
    pub async fn route_named(
        &self,
        signal_type: &str,
        payload: serde_json::Value,
        origin: SignalOrigin,
    ) -> CoreResult<FinalDecision> {
        let parsed: SignalType = signal_type.parse()?;
        self.route_with_origin(parsed, payload, origin).await
    }

    pub async fn route_with_origin(
        &self,
        signal_type: SignalType,
        payload: serde_json::Value,
        origin: SignalOrigin,
    ) -> CoreResult<FinalDecision> {
        let started = Instant::now();
        let rule = self.topology.routing_rule_of(signal_type)?;

        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            signal_type,
            payload,
            priority: rule.priority(),
            timestamp: Utc::now(),
            source: origin.source,
            metadata: origin.metadata,
        };

        debug!(
            signal_id = %signal.id,
            signal = %signal_type,
            tier = %rule.tier,
            priority = signal.priority,
            targets = rule.target_engines.len(),
            "routing signal"
        );

        let mut response_map = self.broadcaster.broadcast(&signal, rule).await;
        let consolidation = consolidate(&response_map, rule);

        // Topology order keeps the trail independent of arrival order.
        let responses: Vec<EngineResponse> = rule
            .target_engines
            .iter()
            .filter_map(|e| response_map.remove(e))
            .collect();

        let derivation = derive(&consolidation, &responses);
        let consensus_failed = consolidation.consensus_required && !consolidation.consensus;
        if consensus_failed {
            warn!(
                signal = %signal_type,
                approvals = consolidation.approvals,
                required = consolidation.required_engines.len(),
                "consensus not reached"
            );
        }

        let decision = FinalDecision {
            signal_id: signal.id,
            signal_type,
            decision: derivation.decision,
            confidence: derivation.confidence,
            tier: rule.tier,
            responses,
            required_engines: consolidation.required_engines,
            responded_engines: consolidation.responded_engines,
            missing_engines: consolidation.missing_engines,
            consensus: consolidation.consensus,
            processing_time_ms: started.elapsed().as_millis() as u64,
            reasoning: derivation.reasoning,
            modifications: derivation.modifications,
        };

        self.stats.record(&decision, consensus_failed);
        info!(
            signal = %signal_type,
            tier = %decision.tier,
            decision = %decision.decision,
            confidence = decision.confidence,
            elapsed_ms = decision.processing_time_ms,
            "signal routed"
        );
        debug!(signal = %signal_type, trail = ?render_reasons(&decision.reasoning), "routing trail");

        Ok(decision)
    }
}
