// =============================================================================
// Central Application State — Exo Fusion decision service
// =============================================================================
//
// Ties the decision core together for the service binary: the signal router,
// the layer store, the rule engine and the orchestrator, plus the latest rule
// context and a bounded audit trail of emitted decisions.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for core components that manage their own interior
//     mutability (RuleConfigStore, LayerStore, stats counters).
//   - A tokio broadcast channel fans new decisions out to WebSocket clients.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::fusion::{LayerSnapshot, LayerSource, LayerStore, MergeWeights, SignalMerger};
use crate::orchestrator::{ExoDecision, Orchestrator, OrchestratorStatsSnapshot};
use crate::routing::{
    EngineRegistry, FinalDecision, Router, RouterStatsSnapshot, SignalOrigin, Topology,
};
use crate::rules::{RuleAdjustment, RuleConfig, RuleConfigStore, RuleContext, RuleEngine};
use crate::runtime_config::{OrchestratorParams, RuntimeConfig};

/// Maximum number of recent orchestrator decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;
/// Maximum number of recent routed-signal decisions to retain.
const MAX_RECENT_ROUTES: usize = 100;
/// Buffered feed events per slow WebSocket client before it starts lagging.
const FEED_CAPACITY: usize = 256;

// =============================================================================
// Feed events
// =============================================================================

/// A decision pushed to live subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "decision", rename_all = "snake_case")]
pub enum FeedEvent {
    Exo(Box<ExoDecision>),
    Route(Box<FinalDecision>),
}

// =============================================================================
// AppState
// =============================================================================

/// Shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every meaningful state mutation.
    pub state_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Decision core ───────────────────────────────────────────────────
    pub router: Arc<Router>,
    pub layers: Arc<LayerStore>,
    pub rule_engine: Arc<RuleEngine>,
    pub orchestrator: Arc<Orchestrator>,

    // ── Inputs ──────────────────────────────────────────────────────────
    pub rule_context: RwLock<Option<RuleContext>>,

    // ── Decision audit trail ────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<ExoDecision>>,
    pub recent_routes: RwLock<Vec<FinalDecision>>,
    pub last_cycle_error: RwLock<Option<String>>,

    // ── Live feed ───────────────────────────────────────────────────────
    pub feed: broadcast::Sender<FeedEvent>,

    // ── Auth ────────────────────────────────────────────────────────────
    /// Bearer token for the admin API. `None` rejects every authenticated
    /// request.
    pub admin_token: Option<String>,

    /// Instant when the service was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every component from `config` and the already populated engine
    /// registry.
    ///
    /// Fails on invalid merge weights. Rule overrides that the rule store
    /// rejects are logged and skipped.
    pub fn new(config: RuntimeConfig, registry: EngineRegistry) -> CoreResult<Self> {
        let topology = Arc::new(Topology::standard());
        let router = Arc::new(Router::new(topology, Arc::new(registry)));

        let rule_store = Arc::new(RuleConfigStore::standard());
        for (name, adjustment) in &config.rule_overrides {
            if let Err(e) = rule_store.update(name, *adjustment) {
                warn!(rule = %name, error = %e, "startup rule override rejected");
            }
        }
        let rule_engine = Arc::new(RuleEngine::new(rule_store));

        let merger = SignalMerger::new(config.merge_weights)?;
        let layers = Arc::new(LayerStore::new());
        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.clone(),
            merger,
            rule_engine.clone(),
            layers.clone() as Arc<dyn LayerSource>,
        ));

        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        info!(
            engines = router.registry().len(),
            overrides = config.rule_overrides.len(),
            "application state initialised"
        );

        Ok(Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),
            runtime_config: Arc::new(RwLock::new(config)),
            router,
            layers,
            rule_engine,
            orchestrator,
            rule_context: RwLock::new(None),
            recent_decisions: RwLock::new(Vec::new()),
            recent_routes: RwLock::new(Vec::new()),
            last_cycle_error: RwLock::new(None),
            feed,
            admin_token: None,
            start_time: std::time::Instant::now(),
        })
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }

    // ── Version helpers ─────────────────────────────────────────────────

    /// Atomically increment the state version and return the new value.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    // ── Inputs ──────────────────────────────────────────────────────────

    /// Overlay new layer outputs; layers absent from `update` keep their value.
    pub fn update_layers(&self, update: LayerSnapshot) {
        self.layers.update(update);
        self.increment_version();
    }

    pub fn set_rule_context(&self, ctx: RuleContext) {
        *self.rule_context.write() = Some(ctx);
        self.increment_version();
    }

    /// Adjust one rule through the validated store and mirror the result
    /// into `rule_overrides`, so a later config save keeps it.
    pub fn adjust_rule(&self, name: &str, adjustment: RuleAdjustment) -> CoreResult<RuleConfig> {
        let cfg = self.rule_engine.config().update(name, adjustment)?;
        self.runtime_config.write().rule_overrides.insert(
            name.to_string(),
            RuleAdjustment {
                threshold: Some(cfg.threshold),
                enabled: Some(cfg.enabled),
            },
        );
        self.increment_version();
        Ok(cfg)
    }

    // ── Decisions ───────────────────────────────────────────────────────

    /// Run one orchestrator cycle with the latest inputs and record the
    /// result. Refuses when either the layers or the rule context are missing.
    pub fn run_cycle(&self) -> CoreResult<ExoDecision> {
        let Some(ctx) = self.rule_context.read().clone() else {
            return self.cycle_failed(CoreError::MissingUpstreamLayer(
                "rule context not loaded".into(),
            ));
        };

        match self.orchestrator.evaluate_cycle(&ctx) {
            Ok(decision) => {
                *self.last_cycle_error.write() = None;
                self.push_decision(decision.clone());
                Ok(decision)
            }
            Err(e) => self.cycle_failed(e),
        }
    }

    fn cycle_failed(&self, e: CoreError) -> CoreResult<ExoDecision> {
        *self.last_cycle_error.write() = Some(e.to_string());
        Err(e)
    }

    /// Route one named signal and record the advisory decision.
    pub async fn route_signal(
        &self,
        signal_type: &str,
        payload: Value,
        origin: SignalOrigin,
    ) -> CoreResult<FinalDecision> {
        let decision = self.router.route_named(signal_type, payload, origin).await?;
        self.push_route(decision.clone());
        Ok(decision)
    }

    /// Append an orchestrator decision to the audit trail, capped at
    /// [`MAX_RECENT_DECISIONS`]; oldest entries are evicted first.
    pub fn push_decision(&self, decision: ExoDecision) {
        {
            let mut decisions = self.recent_decisions.write();
            decisions.push(decision.clone());
            while decisions.len() > MAX_RECENT_DECISIONS {
                decisions.remove(0);
            }
        }
        // No subscribers is not an error.
        let _ = self.feed.send(FeedEvent::Exo(Box::new(decision)));
        self.increment_version();
    }

    pub fn push_route(&self, decision: FinalDecision) {
        {
            let mut routes = self.recent_routes.write();
            routes.push(decision.clone());
            while routes.len() > MAX_RECENT_ROUTES {
                routes.remove(0);
            }
        }
        let _ = self.feed.send(FeedEvent::Route(Box::new(decision)));
        self.increment_version();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }

    // ── Snapshot ────────────────────────────────────────────────────────

    /// Full, serialisable view of the service for the API and WebSocket feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read();
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            orchestrator: config.orchestrator.clone(),
            merge_weights: config.merge_weights,
            engines: self
                .router
                .registry()
                .ids()
                .into_iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            layers: self.layers.snapshot(),
            rule_context: self.rule_context.read().clone(),
            rules: RuleConfigView::collect(&self.rule_engine),
            last_decision: self.recent_decisions.read().last().cloned(),
            last_route: self.recent_routes.read().last().cloned(),
            last_cycle_error: self.last_cycle_error.read().clone(),
            router_stats: self.router.stats(),
            orchestrator_stats: self.orchestrator.stats(),
        }
    }
}

// =============================================================================
// Snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RuleConfigView {
    pub name: String,
    #[serde(flatten)]
    pub config: RuleConfig,
}

impl RuleConfigView {
    /// Every configured rule in evaluation order.
    pub fn collect(engine: &RuleEngine) -> Vec<Self> {
        let snapshot = engine.config().snapshot();
        crate::rules::config::RULE_ORDER
            .iter()
            .filter_map(|name| {
                snapshot.get(*name).map(|cfg| Self {
                    name: name.to_string(),
                    config: *cfg,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub orchestrator: OrchestratorParams,
    pub merge_weights: MergeWeights,
    pub engines: Vec<String>,
    pub layers: LayerSnapshot,
    pub rule_context: Option<RuleContext>,
    pub rules: Vec<RuleConfigView>,
    pub last_decision: Option<ExoDecision>,
    pub last_route: Option<FinalDecision>,
    pub last_cycle_error: Option<String>,
    pub router_stats: RouterStatsSnapshot,
    pub orchestrator_stats: OrchestratorStatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{FusionScore, StrategyDecision};
    use crate::orchestrator::Command;
    use crate::types::{Direction, ShieldState};

    fn state() -> AppState {
        AppState::new(RuntimeConfig::default(), EngineRegistry::new()).unwrap()
    }

    fn load_long(state: &AppState) {
        state.update_layers(LayerSnapshot {
            strategy: Some(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 90.0 }),
            fusion: Some(FusionScore { direction: Direction::Long, strength: 80.0 }),
            timing: None,
            shield: Some(ShieldState::Calm),
        });
    }

    fn context() -> RuleContext {
        RuleContext {
            liquidity_usd: 500_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn cycle_needs_both_inputs() {
        let state = state();
        assert!(matches!(state.run_cycle(), Err(CoreError::MissingUpstreamLayer(_))));
        assert!(state.last_cycle_error.read().is_some());

        state.set_rule_context(context());
        assert!(matches!(state.run_cycle(), Err(CoreError::MissingUpstreamLayer(_))));

        load_long(&state);
        let decision = state.run_cycle().unwrap();
        assert_eq!(decision.command, Command::Execute);
        assert!(state.last_cycle_error.read().is_none());
        assert_eq!(state.recent_decisions.read().len(), 1);
    }

    #[test]
    fn audit_trail_is_bounded() {
        let state = state();
        state.set_rule_context(context());
        load_long(&state);
        for _ in 0..(MAX_RECENT_DECISIONS + 15) {
            state.run_cycle().unwrap();
        }
        assert_eq!(state.recent_decisions.read().len(), MAX_RECENT_DECISIONS);
        assert_eq!(state.orchestrator.stats().cycles, (MAX_RECENT_DECISIONS + 15) as u64);
    }

    #[test]
    fn decisions_reach_feed_subscribers() {
        let state = state();
        let mut rx = state.subscribe();
        state.set_rule_context(context());
        load_long(&state);
        state.run_cycle().unwrap();
        match rx.try_recv().unwrap() {
            FeedEvent::Exo(d) => assert_eq!(d.command, Command::Execute),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn startup_overrides_go_through_validation() {
        let mut config = RuntimeConfig::default();
        config
            .rule_overrides
            .insert("max_spread".into(), RuleAdjustment { threshold: Some(30.0), enabled: None });
        config
            .rule_overrides
            .insert("threat_critical".into(), RuleAdjustment { threshold: Some(99.0), enabled: None });
        let state = AppState::new(config, EngineRegistry::new()).unwrap();

        let rules = state.rule_engine.config();
        assert_eq!(rules.get("max_spread").unwrap().threshold, 30.0);
        assert_eq!(rules.get("threat_critical").unwrap().threshold, 80.0);
    }

    #[test]
    fn invalid_weights_fail_startup() {
        let mut config = RuntimeConfig::default();
        config.merge_weights.shield = 0.5;
        assert!(matches!(
            AppState::new(config, EngineRegistry::new()),
            Err(CoreError::InvalidWeights(_))
        ));
    }

    #[test]
    fn snapshot_reflects_mutations() {
        let state = state();
        let v0 = state.current_state_version();
        state.adjust_rule("price_gap", RuleAdjustment { threshold: Some(2.5), enabled: None }).unwrap();
        let snap = state.build_snapshot();
        assert!(snap.state_version > v0);
        let gap = snap.rules.iter().find(|r| r.name == "price_gap").unwrap();
        assert_eq!(gap.config.threshold, 2.5);
        let persisted = state.runtime_config.read().rule_overrides["price_gap"];
        assert_eq!(persisted, RuleAdjustment { threshold: Some(2.5), enabled: Some(true) });
        assert_eq!(snap.rules.len(), 8);
        assert!(snap.last_decision.is_none());
    }
}
