// =============================================================================
// Exo Fusion — signal routing and decision fusion core
// =============================================================================
//
// Two cooperating pipelines:
//   raw signal → Router → FinalDecision (advisory, per tier)
//   layer outputs → SignalMerger → Orchestrator ← RuleEngine → ExoDecision
//
// The service binary wires both behind an HTTP API; the library can be
// embedded directly with constructor-injected components.
// =============================================================================

pub mod api;
pub mod app_state;
pub mod error;
pub mod fusion;
pub mod orchestrator;
pub mod routing;
pub mod rules;
pub mod runtime_config;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use orchestrator::{Command, ExoDecision, Orchestrator};
pub use routing::{FinalDecision, Router, RouteVerdict};
