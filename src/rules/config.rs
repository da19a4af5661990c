// =============================================================================
// Rule Configuration — the only long-lived mutable state in the core
// =============================================================================
//
// Every read takes one consistent copy under the read lock, and every
// adjustment is a validated read-modify-write under the write lock, so a
// rule evaluation never observes a half-applied update.
//
// Adjustments are refused (config untouched) when:
//   - the rule does not exist,
//   - the rule is marked non-adjustable,
//   - the new threshold is not a finite, non-negative number.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

pub const SHIELD_ACTIVE: &str = "shield_active";
pub const THREAT_CRITICAL: &str = "threat_critical";
pub const MAX_SPREAD: &str = "max_spread";
pub const MIN_LIQUIDITY: &str = "min_liquidity";
pub const MAX_VOLATILITY: &str = "max_volatility";
pub const MAX_POSITION_SIZE: &str = "max_position_size";
pub const SIGNAL_CONFLICTS: &str = "signal_conflicts";
pub const PRICE_GAP: &str = "price_gap";

/// Evaluation order of the battery.
pub const RULE_ORDER: [&str; 8] = [
    SHIELD_ACTIVE,
    THREAT_CRITICAL,
    MAX_SPREAD,
    MIN_LIQUIDITY,
    MAX_VOLATILITY,
    MAX_POSITION_SIZE,
    SIGNAL_CONFLICTS,
    PRICE_GAP,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Blocking,
}

impl Severity {
    /// Only a triggered BLOCKING rule overrides execution.
    pub fn implies_override(self) -> bool {
        matches!(self, Self::Blocking)
    }

    /// Severity score assigned to a triggered threshold rule.
    pub fn points(self) -> f64 {
        match self {
            Self::Info => 20.0,
            Self::Warning => 50.0,
            Self::Blocking => 80.0,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Blocking => write!(f, "BLOCKING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub severity: Severity,
    pub adjustable: bool,
}

/// A requested change. Absent fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleAdjustment {
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug)]
pub struct RuleConfigStore {
    inner: RwLock<HashMap<String, RuleConfig>>,
}

impl RuleConfigStore {
    pub fn new(configs: HashMap<String, RuleConfig>) -> Self {
        Self {
            inner: RwLock::new(configs),
        }
    }

    /// Production defaults for the standard battery.
    pub fn standard() -> Self {
        let mut m = HashMap::new();
        m.insert(SHIELD_ACTIVE.to_string(), fixed(0.0));
        m.insert(THREAT_CRITICAL.to_string(), fixed(80.0));
        m.insert(MAX_SPREAD.to_string(), adjustable(15.0, Severity::Blocking));
        m.insert(MIN_LIQUIDITY.to_string(), adjustable(50_000.0, Severity::Blocking));
        m.insert(MAX_VOLATILITY.to_string(), adjustable(5.0, Severity::Warning));
        m.insert(MAX_POSITION_SIZE.to_string(), adjustable(250.0, Severity::Blocking));
        m.insert(SIGNAL_CONFLICTS.to_string(), adjustable(2.0, Severity::Warning));
        m.insert(PRICE_GAP.to_string(), adjustable(1.0, Severity::Info));
        Self::new(m)
    }

    pub fn get(&self, name: &str) -> Option<RuleConfig> {
        self.inner.read().get(name).copied()
    }

    /// Consistent copy of every rule's configuration.
    pub fn snapshot(&self) -> HashMap<String, RuleConfig> {
        self.inner.read().clone()
    }

    /// Validate and apply an adjustment atomically. Returns the new config.
    pub fn update(&self, name: &str, adjustment: RuleAdjustment) -> CoreResult<RuleConfig> {
        let mut rules = self.inner.write();

        let Some(current) = rules.get_mut(name) else {
            warn!(rule = name, "rejected adjustment: unknown rule");
            return Err(CoreError::UnknownRule(name.to_string()));
        };

        if !current.adjustable {
            warn!(rule = name, ?adjustment, "rejected adjustment: rule is not adjustable");
            return Err(CoreError::RuleNotAdjustable(name.to_string()));
        }

        if let Some(threshold) = adjustment.threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                warn!(rule = name, threshold, "rejected adjustment: invalid threshold");
                return Err(CoreError::InvalidThreshold {
                    rule: name.to_string(),
                    value: threshold,
                });
            }
        }

        let before = *current;
        if let Some(threshold) = adjustment.threshold {
            current.threshold = threshold;
        }
        if let Some(enabled) = adjustment.enabled {
            current.enabled = enabled;
        }

        info!(
            rule = name,
            threshold_before = before.threshold,
            threshold_after = current.threshold,
            enabled_before = before.enabled,
            enabled_after = current.enabled,
            "rule config adjusted"
        );
        Ok(*current)
    }
}

impl Default for RuleConfigStore {
    fn default() -> Self {
        Self::standard()
    }
}

fn fixed(threshold: f64) -> RuleConfig {
    RuleConfig {
        enabled: true,
        threshold,
        severity: Severity::Blocking,
        adjustable: false,
    }
}

fn adjustable(threshold: f64, severity: Severity) -> RuleConfig {
    RuleConfig {
        enabled: true,
        threshold,
        severity,
        adjustable: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn standard_store_covers_the_battery() {
        let store = RuleConfigStore::standard();
        for name in RULE_ORDER {
            assert!(store.get(name).is_some(), "{name} missing");
        }
        assert!(!store.get(SHIELD_ACTIVE).unwrap().adjustable);
        assert!(!store.get(THREAT_CRITICAL).unwrap().adjustable);
        assert_eq!(store.get(MAX_SPREAD).unwrap().threshold, 15.0);
    }

    #[test]
    fn adjustable_rule_accepts_update() {
        let store = RuleConfigStore::standard();
        let cfg = store
            .update(MAX_SPREAD, RuleAdjustment { threshold: Some(25.0), enabled: Some(false) })
            .unwrap();
        assert_eq!(cfg.threshold, 25.0);
        assert!(!cfg.enabled);
        assert_eq!(store.get(MAX_SPREAD), Some(cfg));
    }

    #[test]
    fn non_adjustable_rule_is_left_unchanged() {
        let store = RuleConfigStore::standard();
        let before = store.get(THREAT_CRITICAL).unwrap();
        let err = store
            .update(THREAT_CRITICAL, RuleAdjustment { threshold: Some(99.0), enabled: None })
            .unwrap_err();
        assert_eq!(err, CoreError::RuleNotAdjustable(THREAT_CRITICAL.into()));
        assert_eq!(store.get(THREAT_CRITICAL), Some(before));

        let err = store
            .update(SHIELD_ACTIVE, RuleAdjustment { threshold: None, enabled: Some(false) })
            .unwrap_err();
        assert!(matches!(err, CoreError::RuleNotAdjustable(_)));
        assert!(store.get(SHIELD_ACTIVE).unwrap().enabled);
    }

    #[test]
    fn unknown_rule_and_bad_threshold_are_rejected() {
        let store = RuleConfigStore::standard();
        assert!(matches!(
            store.update("moon_phase", RuleAdjustment::default()),
            Err(CoreError::UnknownRule(_))
        ));
        let before = store.get(PRICE_GAP).unwrap();
        assert!(matches!(
            store.update(PRICE_GAP, RuleAdjustment { threshold: Some(f64::NAN), enabled: Some(false) }),
            Err(CoreError::InvalidThreshold { .. })
        ));
        // Rejection is all-or-nothing: enabled stays untouched as well.
        assert_eq!(store.get(PRICE_GAP), Some(before));
    }

    #[test]
    fn concurrent_updates_never_tear() {
        let store = Arc::new(RuleConfigStore::standard());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = store.clone();
                std::thread::spawn(move || {
                    for j in 0..200 {
                        let v = (i * 1000 + j) as f64;
                        s.update(MAX_SPREAD, RuleAdjustment { threshold: Some(v), enabled: Some(j % 2 == 0) })
                            .unwrap();
                        let snap = s.snapshot();
                        assert!(snap[MAX_SPREAD].threshold >= 0.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(store.get(MAX_SPREAD).is_some());
    }
}
