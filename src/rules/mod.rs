// =============================================================================
// Rules Module
// =============================================================================
//
// Safety rule battery evaluated before every orchestrator decision:
// - RuleContext: market/execution snapshot
// - RuleConfigStore: validated, lock-protected thresholds
// - RuleEngine: ordered, stateless predicates with severity-based blocking

pub mod config;
pub mod context;
pub mod engine;

pub use config::{RuleAdjustment, RuleConfig, RuleConfigStore, Severity};
pub use context::RuleContext;
pub use engine::{highest_severity_rule, should_override_execution, RuleEngine, RuleResult};
