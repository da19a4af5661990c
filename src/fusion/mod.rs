// =============================================================================
// Fusion Module
// =============================================================================
//
// Merges the independent decision layers (strategy, fusion score, timing,
// shield) into one directional verdict with alignment diagnostics.

pub mod layers;
pub mod merger;

pub use layers::{FusionScore, LayerSnapshot, LayerSource, LayerStore, StrategyDecision, TimingScore};
pub use merger::{Alignment, Layer, LayerConflict, MergeWeights, SignalMergeData, SignalMerger};
