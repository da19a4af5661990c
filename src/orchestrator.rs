// =============================================================================
// Orchestrator — compiles merged layers and rule results into one command
// =============================================================================
//
// Per evaluation cycle:
//   1. Snapshot the decision layers and merge them (weighted vote).
//   2. Run the safety rule battery with the merger's conflict count.
//   3. Derive the command, first match wins:
//        failed BLOCKING rule          → WAIT (CANCEL on emergency if enabled)
//        merged signal is WAIT         → WAIT
//        confidence < min strength     → WAIT
//        otherwise                     → EXECUTE
//   4. Risk score = conflicts + misalignment + rule non-compliance
//                   + volatility tier + shield tier, clamped to [0, 100].
//   5. EXECUTE with risk above the limit is downgraded to SCALE.
//   6. Size = base × confidence × (1 − risk), clamped to the size bounds and
//      rounded to cents.
//
// Every branch taken appends a reason, so the trail reads in evaluation order.
// Steps 3–6 are pure; only the cycle wrapper touches shared state.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::fusion::{LayerSource, SignalMergeData, SignalMerger};
use crate::rules::config::{SHIELD_ACTIVE, THREAT_CRITICAL};
use crate::rules::{RuleContext, RuleEngine, RuleResult};
use crate::runtime_config::OrchestratorParams;
use crate::types::{render_reasons, Direction, Reason, ShieldState, VolatilityLevel};

const CONFLICT_POINTS: f64 = 10.0;
const CONFLICT_CAP: f64 = 20.0;
const MISALIGNMENT_WEIGHT: f64 = 0.2;
const NON_COMPLIANCE_WEIGHT: f64 = 0.3;

// ── Command ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Execute,
    Wait,
    Cancel,
    Scale,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute => write!(f, "EXECUTE"),
            Self::Wait => write!(f, "WAIT"),
            Self::Cancel => write!(f, "CANCEL"),
            Self::Scale => write!(f, "SCALE"),
        }
    }
}

// ── Risk ────────────────────────────────────────────────────────────────────

/// The five sub-scores behind a risk score, kept for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub conflicts: f64,
    pub misalignment: f64,
    pub rule_non_compliance: f64,
    pub volatility: f64,
    pub shield: f64,
    /// Sum of the above, clamped to [0, 100].
    pub total: f64,
}

/// Risk score from its inputs. `mean_rule_score` is the mean compliance
/// score of the evaluated rules (100 when none were evaluated).
pub fn compute_risk_score(
    conflict_count: usize,
    overall_alignment: f64,
    mean_rule_score: f64,
    volatility: VolatilityLevel,
    shield: ShieldState,
) -> RiskBreakdown {
    let conflicts = (conflict_count as f64 * CONFLICT_POINTS).min(CONFLICT_CAP);
    let misalignment = (100.0 - overall_alignment.clamp(0.0, 100.0)) * MISALIGNMENT_WEIGHT;
    let rule_non_compliance = (100.0 - mean_rule_score.clamp(0.0, 100.0)) * NON_COMPLIANCE_WEIGHT;
    let volatility = volatility.risk_points();
    let shield = shield.risk_points();

    let sum = conflicts + misalignment + rule_non_compliance + volatility + shield;
    RiskBreakdown {
        conflicts,
        misalignment,
        rule_non_compliance,
        volatility,
        shield,
        total: if sum.is_finite() { sum.clamp(0.0, 100.0) } else { 100.0 },
    }
}

pub fn mean_rule_score(results: &[RuleResult]) -> f64 {
    if results.is_empty() {
        return 100.0;
    }
    results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
}

/// Position size after confidence and risk scaling, clamped and rounded
/// to two decimals.
pub fn compute_final_size(params: &OrchestratorParams, confidence: f64, risk_score: f64) -> f64 {
    let (lo, hi) = params.size_bounds();
    let raw = params.base_recommended_size
        * (confidence.clamp(0.0, 100.0) / 100.0)
        * (1.0 - risk_score.clamp(0.0, 100.0) / 100.0);
    let raw = if raw.is_finite() { raw } else { lo };
    // Round after clamping; bounds are assumed to be at cent precision.
    round2(raw.clamp(lo, hi)).clamp(lo, hi)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub signal_merge: SignalMergeData,
    pub rule_results: Vec<RuleResult>,
    pub passed_rules: Vec<String>,
    pub failed_rules: Vec<String>,
    pub blocking_rules: Vec<String>,
    pub risk: RiskBreakdown,
}

/// One evaluation cycle's verdict for the execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExoDecision {
    pub command: Command,
    pub direction: Direction,
    /// Ordered decision trail.
    pub reason: Vec<Reason>,
    /// Merged confidence, 0–100.
    pub strength: f64,
    pub risk_score: f64,
    pub final_size: f64,
    pub metadata: DecisionMetadata,
    pub timestamp: DateTime<Utc>,
}

impl ExoDecision {
    pub fn is_actionable(&self) -> bool {
        matches!(self.command, Command::Execute | Command::Scale)
    }
}

/// Compile one decision. Pure apart from the supplied timestamp.
pub fn compile_decision(
    params: &OrchestratorParams,
    merge: SignalMergeData,
    rule_results: Vec<RuleResult>,
    ctx: &RuleContext,
    timestamp: DateTime<Utc>,
) -> ExoDecision {
    let mut reason = Vec::new();

    let passed_rules: Vec<String> = rule_results
        .iter()
        .filter(|r| r.passed)
        .map(|r| r.rule_name.clone())
        .collect();
    let failed_rules: Vec<String> = rule_results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.rule_name.clone())
        .collect();
    let blocking_rules: Vec<String> = rule_results
        .iter()
        .filter(|r| r.is_blocking())
        .map(|r| r.rule_name.clone())
        .collect();

    // ── Command derivation ──────────────────────────────────────────────
    let mut command = if !blocking_rules.is_empty() {
        let emergency = blocking_rules
            .iter()
            .any(|n| n == SHIELD_ACTIVE || n == THREAT_CRITICAL);
        if params.cancel_on_emergency && emergency {
            reason.push(Reason::new(
                "emergency_cancel",
                format!("emergency rule blocking: {}", blocking_rules.join(", ")),
            ));
            Command::Cancel
        } else {
            reason.push(Reason::new(
                "blocking_rules",
                format!("blocking rules failed: {}", blocking_rules.join(", ")),
            ));
            Command::Wait
        }
    } else if merge.final_signal == Direction::Wait {
        reason.push(Reason::new("merged_wait", "merged signal is WAIT"));
        Command::Wait
    } else if merge.confidence < params.min_execution_strength {
        reason.push(Reason::new(
            "below_min_strength",
            format!(
                "confidence {:.1} < minimum {:.1}",
                merge.confidence, params.min_execution_strength
            ),
        ));
        Command::Wait
    } else {
        reason.push(Reason::new(
            "execute",
            format!("{} at confidence {:.1}", merge.final_signal, merge.confidence),
        ));
        Command::Execute
    };

    for name in failed_rules.iter().filter(|n| !blocking_rules.contains(n)) {
        reason.push(Reason::new("rule_warning", format!("non-blocking rule failed: {name}")));
    }

    // ── Risk ────────────────────────────────────────────────────────────
    let risk = compute_risk_score(
        merge.conflicts.len(),
        merge.alignment.overall_alignment,
        mean_rule_score(&rule_results),
        ctx.volatility_level(),
        ctx.shield_state,
    );
    reason.push(Reason::new(
        "risk_score",
        format!(
            "risk {:.1} (conflicts {:.1}, misalignment {:.1}, rules {:.1}, volatility {:.1}, shield {:.1})",
            risk.total, risk.conflicts, risk.misalignment, risk.rule_non_compliance, risk.volatility, risk.shield
        ),
    ));

    if command == Command::Execute && risk.total > params.max_risk_score {
        reason.push(Reason::new(
            "risk_downgrade",
            format!("risk {:.1} > limit {:.1}, scaling", risk.total, params.max_risk_score),
        ));
        command = Command::Scale;
    }

    // ── Size ────────────────────────────────────────────────────────────
    let final_size = compute_final_size(params, merge.confidence, risk.total);
    reason.push(Reason::new("size", format!("final size {final_size:.2}")));

    ExoDecision {
        command,
        direction: merge.final_signal,
        reason,
        strength: merge.confidence,
        risk_score: risk.total,
        final_size,
        metadata: DecisionMetadata {
            signal_merge: merge,
            rule_results,
            passed_rules,
            failed_rules,
            blocking_rules,
            risk,
        },
        timestamp,
    }
}

// ── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct OrchestratorStats {
    cycles: AtomicU64,
    executed: AtomicU64,
    waited: AtomicU64,
    cancelled: AtomicU64,
    scaled: AtomicU64,
    blocked: AtomicU64,
    missing_input: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatsSnapshot {
    pub cycles: u64,
    pub executed: u64,
    pub waited: u64,
    pub cancelled: u64,
    pub scaled: u64,
    pub blocked: u64,
    pub missing_input: u64,
}

impl OrchestratorStats {
    fn record(&self, decision: &ExoDecision) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let counter = match decision.command {
            Command::Execute => &self.executed,
            Command::Wait => &self.waited,
            Command::Cancel => &self.cancelled,
            Command::Scale => &self.scaled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if !decision.metadata.blocking_rules.is_empty() {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> OrchestratorStatsSnapshot {
        OrchestratorStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            scaled: self.scaled.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            missing_input: self.missing_input.load(Ordering::Relaxed),
        }
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator {
    params: OrchestratorParams,
    merger: SignalMerger,
    rules: Arc<RuleEngine>,
    layers: Arc<dyn LayerSource>,
    stats: OrchestratorStats,
}

impl Orchestrator {
    pub fn new(
        params: OrchestratorParams,
        merger: SignalMerger,
        rules: Arc<RuleEngine>,
        layers: Arc<dyn LayerSource>,
    ) -> Self {
        Self {
            params,
            merger,
            rules,
            layers,
            stats: OrchestratorStats::default(),
        }
    }

    pub fn params(&self) -> &OrchestratorParams {
        &self.params
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    pub fn stats(&self) -> OrchestratorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Compile a decision from already computed inputs.
    pub fn compute_final_decision(
        &self,
        merge: SignalMergeData,
        rule_results: Vec<RuleResult>,
        ctx: &RuleContext,
    ) -> ExoDecision {
        compile_decision(&self.params, merge, rule_results, ctx, Utc::now())
    }

    /// Run one full cycle against the current layer outputs.
    ///
    /// Refuses to decide when no layer output has been loaded yet.
    pub fn evaluate_cycle(&self, ctx: &RuleContext) -> CoreResult<ExoDecision> {
        let snapshot = self.layers.snapshot();
        if snapshot.is_empty() {
            self.stats.missing_input.fetch_add(1, Ordering::Relaxed);
            return Err(CoreError::MissingUpstreamLayer(
                "layer inputs not loaded".into(),
            ));
        }

        let merge = self.merger.merge(&snapshot)?;
        let ctx = ctx
            .clone()
            .with_conflict_count(merge.conflicts.len())
            .with_shield_floor(snapshot.shield);
        let rule_results = self.rules.evaluate(&ctx);
        let decision = self.compute_final_decision(merge, rule_results, &ctx);
        self.stats.record(&decision);

        if decision.metadata.blocking_rules.is_empty() {
            debug!(
                command = %decision.command,
                direction = %decision.direction,
                strength = decision.strength,
                risk = decision.risk_score,
                size = decision.final_size,
                "cycle compiled"
            );
        } else {
            warn!(
                command = %decision.command,
                blocking = ?decision.metadata.blocking_rules,
                trail = ?render_reasons(&decision.reason),
                "execution blocked by safety rules"
            );
        }
        if decision.is_actionable() {
            info!(
                command = %decision.command,
                direction = %decision.direction,
                strength = decision.strength,
                risk = decision.risk_score,
                size = decision.final_size,
                "actionable decision"
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{Alignment, FusionScore, LayerStore, MergeWeights, StrategyDecision, TimingScore};
    use crate::rules::{RuleConfigStore, Severity};

    fn merge(signal: Direction, confidence: f64, alignment: f64, conflicts: usize) -> SignalMergeData {
        let conflict = crate::fusion::LayerConflict {
            first: crate::fusion::Layer::Strategy,
            second: crate::fusion::Layer::Fusion,
            first_vote: Direction::Long,
            second_vote: Direction::Short,
        };
        SignalMergeData {
            final_signal: signal,
            confidence,
            weights: MergeWeights::default(),
            alignment: Alignment {
                strategy: Some(true),
                fusion: Some(true),
                timing: Some(true),
                shield: Some(true),
                overall_alignment: alignment,
            },
            conflicts: vec![conflict; conflicts],
            votes: Vec::new(),
        }
    }

    fn rule(name: &str, passed: bool, score: f64, severity: Severity) -> RuleResult {
        RuleResult {
            rule_name: name.to_string(),
            passed,
            score,
            severity_score: 100.0 - score,
            reason: String::new(),
            severity,
        }
    }

    fn calm() -> RuleContext {
        RuleContext {
            liquidity_usd: 200_000.0,
            volatility_pct: 0.5,
            ..Default::default()
        }
    }

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn risk_score_worked_example() {
        let risk = compute_risk_score(2, 40.0, 50.0, VolatilityLevel::Extreme, ShieldState::Defensive);
        assert!((risk.conflicts - 20.0).abs() < 1e-9);
        assert!((risk.misalignment - 12.0).abs() < 1e-9);
        assert!((risk.rule_non_compliance - 15.0).abs() < 1e-9);
        assert!((risk.total - 77.0).abs() < 1e-9);
    }

    #[test]
    fn high_risk_execute_is_downgraded_to_scale() {
        let ctx = RuleContext {
            volatility_pct: 6.0,
            shield_state: ShieldState::Defensive,
            ..calm()
        };
        // Warnings only, mean score 50, so nothing blocks.
        let rules = vec![
            rule("max_volatility", false, 50.0, Severity::Warning),
            rule("signal_conflicts", false, 50.0, Severity::Warning),
        ];
        let d = compile_decision(
            &OrchestratorParams::default(),
            merge(Direction::Long, 80.0, 40.0, 2),
            rules,
            &ctx,
            ts(),
        );
        assert!((d.risk_score - 77.0).abs() < 1e-9);
        assert_eq!(d.command, Command::Scale);
        let codes: Vec<&str> = d.reason.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["execute", "rule_warning", "rule_warning", "risk_score", "risk_downgrade", "size"]
        );
    }

    #[test]
    fn weak_confidence_waits_regardless_of_rules() {
        let d = compile_decision(
            &OrchestratorParams::default(),
            merge(Direction::Long, 55.0, 100.0, 0),
            Vec::new(),
            &calm(),
            ts(),
        );
        assert_eq!(d.command, Command::Wait);
        assert_eq!(d.reason[0].code, "below_min_strength");
    }

    #[test]
    fn merged_wait_waits() {
        let d = compile_decision(
            &OrchestratorParams::default(),
            merge(Direction::Wait, 95.0, 100.0, 0),
            Vec::new(),
            &calm(),
            ts(),
        );
        assert_eq!(d.command, Command::Wait);
        assert_eq!(d.reason[0].code, "merged_wait");
    }

    #[test]
    fn blocking_rule_dominates_strong_signal() {
        let rules = vec![rule("max_spread", false, 20.0, Severity::Blocking)];
        let d = compile_decision(
            &OrchestratorParams::default(),
            merge(Direction::Long, 99.0, 100.0, 0),
            rules,
            &calm(),
            ts(),
        );
        assert_eq!(d.command, Command::Wait);
        assert_eq!(d.metadata.blocking_rules, vec!["max_spread".to_string()]);
    }

    #[test]
    fn emergency_cancel_only_when_enabled() {
        let rules = vec![rule(SHIELD_ACTIVE, false, 0.0, Severity::Blocking)];
        let mut params = OrchestratorParams::default();
        let d = compile_decision(&params, merge(Direction::Long, 90.0, 100.0, 0), rules.clone(), &calm(), ts());
        assert_eq!(d.command, Command::Wait);

        params.cancel_on_emergency = true;
        let d = compile_decision(&params, merge(Direction::Long, 90.0, 100.0, 0), rules, &calm(), ts());
        assert_eq!(d.command, Command::Cancel);

        // A non-emergency blocking rule still waits.
        let rules = vec![rule("min_liquidity", false, 20.0, Severity::Blocking)];
        let d = compile_decision(&params, merge(Direction::Long, 90.0, 100.0, 0), rules, &calm(), ts());
        assert_eq!(d.command, Command::Wait);
    }

    #[test]
    fn size_scales_and_clamps() {
        let params = OrchestratorParams::default();
        assert!((compute_final_size(&params, 80.0, 20.0) - 64.0).abs() < 1e-9);
        assert!((compute_final_size(&params, 0.0, 0.0) - 5.0).abs() < 1e-9);
        assert!((compute_final_size(&params, 100.0, 100.0) - 5.0).abs() < 1e-9);

        let big = OrchestratorParams { base_recommended_size: 10_000.0, ..Default::default() };
        assert!((compute_final_size(&big, 100.0, 0.0) - 250.0).abs() < 1e-9);
        assert!((compute_final_size(&params, 66.666, 10.0) - 60.0).abs() < 1e-9);

        for conf in [0.0, 17.3, 55.0, 100.0, f64::NAN] {
            for risk in [0.0, 33.3, 77.0, 100.0] {
                let s = compute_final_size(&params, conf, risk);
                assert!((5.0..=250.0).contains(&s), "size {s} out of bounds");
            }
        }
    }

    #[test]
    fn compilation_is_deterministic() {
        let rules = vec![rule("price_gap", false, 80.0, Severity::Info)];
        let a = compile_decision(
            &OrchestratorParams::default(),
            merge(Direction::Short, 72.0, 75.0, 1),
            rules.clone(),
            &calm(),
            ts(),
        );
        let b = compile_decision(
            &OrchestratorParams::default(),
            merge(Direction::Short, 72.0, 75.0, 1),
            rules,
            &calm(),
            ts(),
        );
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
    }

    fn orchestrator(layers: Arc<LayerStore>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorParams::default(),
            SignalMerger::default(),
            Arc::new(RuleEngine::new(Arc::new(RuleConfigStore::standard()))),
            layers,
        )
    }

    #[test]
    fn cycle_refuses_without_layers() {
        let orch = orchestrator(Arc::new(LayerStore::new()));
        let err = orch.evaluate_cycle(&calm()).unwrap_err();
        assert!(matches!(err, CoreError::MissingUpstreamLayer(_)));
        assert_eq!(orch.stats().missing_input, 1);
        assert_eq!(orch.stats().cycles, 0);
    }

    #[test]
    fn full_cycle_executes_on_aligned_layers() {
        let layers = Arc::new(LayerStore::new());
        layers.set_strategy(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 80.0 });
        layers.set_fusion(FusionScore { direction: Direction::Long, strength: 70.0 });
        layers.set_timing(TimingScore { fire: true, score: 90.0 });
        layers.set_shield(ShieldState::Calm);
        let orch = orchestrator(layers.clone());

        let d = orch.evaluate_cycle(&calm()).unwrap();
        assert_eq!(d.command, Command::Execute);
        assert_eq!(d.direction, Direction::Long);
        // Full alignment, every rule passes, calm market: no risk.
        assert_eq!(d.risk_score, 0.0);
        assert!((d.final_size - 81.5).abs() < 1e-9);
        assert!(d.metadata.failed_rules.is_empty());

        layers.set_shield(ShieldState::Defensive);
        let ctx = RuleContext { shield_state: ShieldState::Defensive, ..calm() };
        let d = orch.evaluate_cycle(&ctx).unwrap();
        assert_eq!(d.command, Command::Wait);
        assert!(d.metadata.blocking_rules.contains(&SHIELD_ACTIVE.to_string()));

        let stats = orch.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.blocked, 1);
    }

    #[test]
    fn defensive_shield_layer_blocks_despite_calm_context() {
        let layers = Arc::new(LayerStore::new());
        layers.set_strategy(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 80.0 });
        layers.set_fusion(FusionScore { direction: Direction::Long, strength: 70.0 });
        layers.set_timing(TimingScore { fire: true, score: 90.0 });
        layers.set_shield(ShieldState::Defensive);
        let orch = orchestrator(layers);

        let d = orch.evaluate_cycle(&calm()).unwrap();
        assert_eq!(d.command, Command::Wait);
        assert!(d.metadata.blocking_rules.contains(&SHIELD_ACTIVE.to_string()));
        assert_eq!(d.metadata.risk.shield, 15.0);
    }

    #[test]
    fn cycle_feeds_merger_conflicts_into_rules() {
        let layers = Arc::new(LayerStore::new());
        layers.set_strategy(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 80.0 });
        layers.set_fusion(FusionScore { direction: Direction::Short, strength: 70.0 });
        layers.set_timing(TimingScore { fire: false, score: 10.0 });
        let orch = orchestrator(layers);

        // Three layers, three different votes: three conflicting pairs.
        let d = orch.evaluate_cycle(&calm()).unwrap();
        assert_eq!(d.metadata.signal_merge.conflicts.len(), 3);
        assert!(d.metadata.failed_rules.contains(&"signal_conflicts".to_string()));
    }
}
