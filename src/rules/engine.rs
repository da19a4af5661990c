// =============================================================================
// Rule Engine — ordered battery of stateless safety predicates
// =============================================================================
//
// Rules (evaluation order):
//   1. shield_active    : shield in a blocking state           (fixed, BLOCKING)
//   2. threat_critical  : threat level above the fixed limit   (fixed, BLOCKING)
//   3. max_spread       : spread bps above threshold
//   4. min_liquidity    : liquidity below threshold
//   5. max_volatility   : volatility pct above threshold
//   6. max_position_size: proposed size above threshold
//   7. signal_conflicts : conflicting layer pairs above threshold
//   8. price_gap        : price gap pct above threshold
//
// Threshold rules report their configured severity only when triggered.
// Disabled rules are skipped and produce no result.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rules::config::{
    RuleConfig, RuleConfigStore, Severity, MAX_POSITION_SIZE, MAX_SPREAD, MAX_VOLATILITY,
    MIN_LIQUIDITY, PRICE_GAP, RULE_ORDER, SHIELD_ACTIVE, SIGNAL_CONFLICTS, THREAT_CRITICAL,
};
use crate::rules::context::RuleContext;

const SHIELD_SEVERITY_SCORE: f64 = 100.0;
const THREAT_SEVERITY_SCORE: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_name: String,
    pub passed: bool,
    /// Compliance, 0–100. 100 when passed.
    pub score: f64,
    /// Magnitude of the triggered condition, 0–100. 0 when passed.
    pub severity_score: f64,
    pub reason: String,
    pub severity: Severity,
}

impl RuleResult {
    fn pass(name: &str, reason: String) -> Self {
        Self {
            rule_name: name.to_string(),
            passed: true,
            score: 100.0,
            severity_score: 0.0,
            reason,
            severity: Severity::Info,
        }
    }

    fn fail(name: &str, reason: String, severity: Severity, severity_score: f64) -> Self {
        Self {
            rule_name: name.to_string(),
            passed: false,
            score: 100.0 - severity_score,
            severity_score,
            reason,
            severity,
        }
    }

    /// Failed and BLOCKING.
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity.implies_override()
    }
}

pub struct RuleEngine {
    config: Arc<RuleConfigStore>,
}

impl RuleEngine {
    pub fn new(config: Arc<RuleConfigStore>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<RuleConfigStore> {
        &self.config
    }

    /// Run the battery against `ctx`. Thresholds come from one consistent
    /// snapshot of the configuration.
    pub fn evaluate(&self, ctx: &RuleContext) -> Vec<RuleResult> {
        let results = Self::evaluate_with(&self.config.snapshot(), ctx);
        debug!(
            evaluated = results.len(),
            failed = results.iter().filter(|r| !r.passed).count(),
            blocking = results.iter().filter(|r| r.is_blocking()).count(),
            "rule battery evaluated"
        );
        results
    }

    /// Evaluate with an explicit configuration set instead of the store.
    /// Disabled rules emit no result.
    pub fn evaluate_with(configs: &HashMap<String, RuleConfig>, ctx: &RuleContext) -> Vec<RuleResult> {
        RULE_ORDER
            .iter()
            .filter_map(|name| {
                let cfg = configs.get(*name)?;
                cfg.enabled.then(|| evaluate_rule(name, cfg, ctx))
            })
            .collect()
    }
}

/// True iff any triggered rule implies override (i.e. is BLOCKING).
pub fn should_override_execution(results: &[RuleResult]) -> bool {
    results.iter().any(RuleResult::is_blocking)
}

/// Rule with the largest severity score; ties keep the earliest evaluated.
pub fn highest_severity_rule(results: &[RuleResult]) -> Option<&RuleResult> {
    let mut best: Option<&RuleResult> = None;
    for r in results {
        match best {
            Some(b) if r.severity_score <= b.severity_score => {}
            _ => best = Some(r),
        }
    }
    best
}

fn evaluate_rule(name: &str, cfg: &RuleConfig, ctx: &RuleContext) -> RuleResult {
    match name {
        SHIELD_ACTIVE => {
            if ctx.shield_state.is_blocking() {
                RuleResult::fail(
                    name,
                    format!("shield is {}", ctx.shield_state),
                    Severity::Blocking,
                    SHIELD_SEVERITY_SCORE,
                )
            } else {
                RuleResult::pass(name, format!("shield is {}", ctx.shield_state))
            }
        }
        THREAT_CRITICAL => {
            if ctx.threat_level > cfg.threshold {
                RuleResult::fail(
                    name,
                    format!("threat level {:.1} > {:.1}", ctx.threat_level, cfg.threshold),
                    Severity::Blocking,
                    THREAT_SEVERITY_SCORE,
                )
            } else {
                RuleResult::pass(
                    name,
                    format!("threat level {:.1} <= {:.1}", ctx.threat_level, cfg.threshold),
                )
            }
        }
        MAX_SPREAD => above(name, cfg, ctx.spread_bps, "spread", "bps"),
        MIN_LIQUIDITY => {
            if ctx.liquidity_usd < cfg.threshold {
                RuleResult::fail(
                    name,
                    format!("liquidity {:.0} < {:.0}", ctx.liquidity_usd, cfg.threshold),
                    cfg.severity,
                    cfg.severity.points(),
                )
            } else {
                RuleResult::pass(
                    name,
                    format!("liquidity {:.0} >= {:.0}", ctx.liquidity_usd, cfg.threshold),
                )
            }
        }
        MAX_VOLATILITY => above(name, cfg, ctx.volatility_pct, "volatility", "%"),
        MAX_POSITION_SIZE => above(name, cfg, ctx.position_size, "position size", "units"),
        SIGNAL_CONFLICTS => above(name, cfg, ctx.conflict_count as f64, "conflicts", ""),
        PRICE_GAP => above(name, cfg, ctx.price_gap_pct, "price gap", "%"),
        // RULE_ORDER and the match arms are kept in step; an unknown name
        // cannot reach here, but fail closed if it ever does.
        other => RuleResult::fail(
            other,
            format!("no evaluator for rule {other}"),
            Severity::Blocking,
            Severity::Blocking.points(),
        ),
    }
}

/// Trigger when `value` exceeds the threshold.
fn above(name: &str, cfg: &RuleConfig, value: f64, what: &str, unit: &str) -> RuleResult {
    if value > cfg.threshold {
        RuleResult::fail(
            name,
            format!("{what} {value:.2}{unit} > {:.2}{unit}", cfg.threshold),
            cfg.severity,
            cfg.severity.points(),
        )
    } else {
        RuleResult::pass(name, format!("{what} {value:.2}{unit} <= {:.2}{unit}", cfg.threshold))
    }
}
