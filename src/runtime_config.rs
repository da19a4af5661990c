// =============================================================================
// Runtime Configuration — hot-reloadable core settings with atomic save
// =============================================================================
//
// Every tunable of the decision core lives here: orchestrator gates and
// sizing bounds, merge weights, rule overrides and the remote engine table.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fusion::MergeWeights;
use crate::routing::SignalType;
use crate::rules::RuleAdjustment;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_min_execution_strength() -> f64 {
    60.0
}

fn default_max_risk_score() -> f64 {
    70.0
}

fn default_base_recommended_size() -> f64 {
    100.0
}

fn default_min_position_size() -> f64 {
    5.0
}

fn default_max_position_size() -> f64 {
    250.0
}

fn default_cycle_interval_ms() -> u64 {
    1000
}

// =============================================================================
// OrchestratorParams
// =============================================================================

/// Gates and sizing bounds for the decision compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorParams {
    /// Merged confidence below this never executes.
    #[serde(default = "default_min_execution_strength")]
    pub min_execution_strength: f64,

    /// EXECUTE above this risk score is downgraded to SCALE.
    #[serde(default = "default_max_risk_score")]
    pub max_risk_score: f64,

    /// Size before confidence and risk scaling.
    #[serde(default = "default_base_recommended_size")]
    pub base_recommended_size: f64,

    /// Hard floor of the final size.
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,

    /// Hard ceiling of the final size.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    /// Emit CANCEL instead of WAIT when an emergency rule (shield active,
    /// threat critical) blocks.
    #[serde(default)]
    pub cancel_on_emergency: bool,

    /// Period of the evaluation loop in the service binary.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
}

impl Default for OrchestratorParams {
    fn default() -> Self {
        Self {
            min_execution_strength: default_min_execution_strength(),
            max_risk_score: default_max_risk_score(),
            base_recommended_size: default_base_recommended_size(),
            min_position_size: default_min_position_size(),
            max_position_size: default_max_position_size(),
            cancel_on_emergency: false,
            cycle_interval_ms: default_cycle_interval_ms(),
        }
    }
}

impl OrchestratorParams {
    /// Size bounds in order, tolerating a config that swapped them.
    pub fn size_bounds(&self) -> (f64, f64) {
        let lo = self.min_position_size.min(self.max_position_size).max(0.0);
        let hi = self.min_position_size.max(self.max_position_size).max(0.0);
        (lo, hi)
    }
}

// =============================================================================
// Engine endpoints
// =============================================================================

/// A remote scoring engine reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEndpoint {
    pub id: String,
    pub endpoint: String,
    #[serde(default)]
    pub can_handle: Vec<SignalType>,
    #[serde(default)]
    pub response_time_ms: u64,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the decision core.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Decision compiler gates and sizing.
    #[serde(default)]
    pub orchestrator: OrchestratorParams,

    /// Layer weights for the signal merger. Must sum to 1.0.
    #[serde(default)]
    pub merge_weights: MergeWeights,

    /// Startup adjustments applied through the rule administration API.
    /// Non-adjustable rules reject their override with a warning.
    #[serde(default)]
    pub rule_overrides: BTreeMap<String, RuleAdjustment>,

    /// Remote engines registered at startup.
    #[serde(default)]
    pub engines: Vec<EngineEndpoint>,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            engines = config.engines.len(),
            overrides = config.rule_overrides.len(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert!((cfg.orchestrator.min_execution_strength - 60.0).abs() < f64::EPSILON);
        assert!((cfg.orchestrator.max_risk_score - 70.0).abs() < f64::EPSILON);
        assert!(!cfg.orchestrator.cancel_on_emergency);
        assert!((cfg.merge_weights.strategy - 0.35).abs() < f64::EPSILON);
        assert!(cfg.engines.is_empty());
        assert!(cfg.rule_overrides.is_empty());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.orchestrator, OrchestratorParams::default());
        assert_eq!(cfg.merge_weights, MergeWeights::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "orchestrator": { "max_risk_score": 55 },
            "rule_overrides": { "max_spread": { "threshold": 20 } },
            "engines": [{ "id": "timing_gate", "endpoint": "http://timing:7000", "can_handle": ["BREAKOUT"] }]
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.orchestrator.max_risk_score - 55.0).abs() < f64::EPSILON);
        assert!((cfg.orchestrator.min_execution_strength - 60.0).abs() < f64::EPSILON);
        assert_eq!(cfg.rule_overrides["max_spread"].threshold, Some(20.0));
        assert_eq!(cfg.rule_overrides["max_spread"].enabled, None);
        assert_eq!(cfg.engines[0].can_handle, vec![SignalType::Breakout]);
        assert_eq!(cfg.engines[0].response_time_ms, 0);
    }

    #[test]
    fn swapped_size_bounds_are_reordered() {
        let params = OrchestratorParams {
            min_position_size: 300.0,
            max_position_size: 10.0,
            ..Default::default()
        };
        assert_eq!(params.size_bounds(), (10.0, 300.0));
    }

    #[test]
    fn save_then_load_is_atomic_and_lossless() {
        let dir = std::env::temp_dir().join(format!("exo-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.orchestrator.cancel_on_emergency = true;
        cfg.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let back = RuntimeConfig::load(&path).unwrap();
        assert!(back.orchestrator.cancel_on_emergency);
        std::fs::remove_dir_all(&dir).ok();
    }
}
