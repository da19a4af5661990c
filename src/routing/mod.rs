// =============================================================================
// Routing Module
// =============================================================================
//
// Tiered signal routing:
// - Static topology (signal type → tier, engines, deadline, consensus policy)
// - Concurrent broadcast with per-engine and group deadlines
// - Consolidation of required-engine coverage and consensus
// - Deterministic verdict derivation

pub mod broadcaster;
pub mod consolidator;
pub mod decision;
pub mod engine;
pub mod http_engine;
pub mod router;
pub mod signal;
pub mod topology;

pub use broadcaster::{Broadcaster, ResponseMap};
pub use consolidator::{consolidate, Consolidation};
pub use decision::{FinalDecision, RouteVerdict};
pub use engine::{EngineCapability, EngineId, EngineRegistry, EngineResponse, ScoringEngine};
pub use http_engine::HttpEngine;
pub use router::{Router, RouterStatsSnapshot, SignalOrigin};
pub use signal::{Signal, SignalType, Tier};
pub use topology::{RoutingRule, Topology};
