// =============================================================================
// Exo Fusion — Main Entry Point
// =============================================================================
//
// Loads the runtime config, registers the remote scoring engines, then runs
// the HTTP API and the periodic orchestrator cycle until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use exo_fusion::api;
use exo_fusion::app_state::AppState;
use exo_fusion::error::CoreError;
use exo_fusion::routing::{EngineCapability, EngineId, EngineRegistry, HttpEngine};
use exo_fusion::runtime_config::RuntimeConfig;

const DEFAULT_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Exo Fusion decision service starting");

    let config_path =
        std::env::var("EXO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config_path, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    info!(
        min_strength = config.orchestrator.min_execution_strength,
        max_risk = config.orchestrator.max_risk_score,
        cycle_ms = config.orchestrator.cycle_interval_ms,
        cancel_on_emergency = config.orchestrator.cancel_on_emergency,
        "orchestrator parameters"
    );

    // ── 2. Engine registry ───────────────────────────────────────────────
    let mut registry = EngineRegistry::new();
    for engine in &config.engines {
        if engine.can_handle.is_empty() {
            warn!(engine = %engine.id, "engine lists no signal types; it will never be queried");
        }
        let id = EngineId::new(engine.id.clone());
        let client = HttpEngine::new(id.clone(), engine.endpoint.clone())
            .with_context(|| format!("failed to create engine {}", engine.id))?;
        registry.register(
            id,
            EngineCapability {
                can_handle: engine.can_handle.clone(),
                response_time_ms: engine.response_time_ms,
            },
            Arc::new(client),
        );
        info!(engine = %engine.id, endpoint = %engine.endpoint, "engine registered");
    }

    // ── 3. Application state ─────────────────────────────────────────────
    let admin_token = std::env::var("EXO_ADMIN_TOKEN").ok();
    if admin_token.as_deref().map_or(true, str::is_empty) {
        warn!("EXO_ADMIN_TOKEN is not set; the admin API will reject every request");
    }
    let cycle_interval_ms = config.orchestrator.cycle_interval_ms.max(1);
    let state = Arc::new(
        AppState::new(config, registry)
            .context("invalid runtime configuration")?
            .with_admin_token(admin_token),
    );

    // ── 4. API server ────────────────────────────────────────────────────
    let bind_addr = std::env::var("EXO_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 5. Evaluation loop ───────────────────────────────────────────────
    let loop_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_millis(cycle_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut waiting_for_inputs = false;

        loop {
            interval.tick().await;
            match loop_state.run_cycle() {
                Ok(decision) => {
                    waiting_for_inputs = false;
                    debug!(
                        command = %decision.command,
                        risk = decision.risk_score,
                        size = decision.final_size,
                        "cycle complete"
                    );
                }
                Err(CoreError::MissingUpstreamLayer(what)) => {
                    // Log the transition only, not every skipped tick.
                    if !waiting_for_inputs {
                        warn!(missing = %what, "skipping cycles until inputs are loaded");
                        waiting_for_inputs = true;
                    }
                }
                Err(e) => error!(error = %e, "orchestrator cycle failed"),
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    if let Err(e) = state.runtime_config.read().save(&config_path) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    let router_stats = state.router.stats();
    let orch_stats = state.orchestrator.stats();
    info!(
        routed = router_stats.routed,
        cycles = orch_stats.cycles,
        executed = orch_stats.executed,
        blocked = orch_stats.blocked,
        "Exo Fusion shut down complete"
    );
    Ok(())
}
