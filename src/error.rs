// =============================================================================
// Error taxonomy for the decision core
// =============================================================================
//
// Engine timeouts and engine failures are not represented here: the
// broadcaster recovers them locally as zero-confidence rejections. Missing
// required engines surface as a DEFER verdict, also not an error.
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// The signal type has no entry in the routing topology.
    #[error("unmapped signal type: {0}")]
    UnmappedSignalType(String),

    /// A topology was built without an entry for every supported signal type.
    #[error("topology is missing entries for: {0:?}")]
    IncompleteTopology(Vec<String>),

    /// A topology entry is internally inconsistent.
    #[error("invalid topology entry for {signal_type}: {message}")]
    InvalidTopology { signal_type: String, message: String },

    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// The rule exists but refuses runtime adjustment.
    #[error("rule {0} is not adjustable")]
    RuleNotAdjustable(String),

    #[error("invalid threshold {value} for rule {rule}")]
    InvalidThreshold { rule: String, value: f64 },

    /// The orchestrator was asked for a decision before its inputs exist.
    #[error("upstream layer not loaded: {0}")]
    MissingUpstreamLayer(String),

    #[error("invalid merge weights: {0}")]
    InvalidWeights(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
