// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires a valid Bearer token checked via the `AuthBearer` extractor.
//
//   GET  /api/v1/health         liveness + state version
//   GET  /api/v1/state          full state snapshot
//   POST /api/v1/signals        route one signal through the engine topology
//   GET  /api/v1/rules          rule configuration in evaluation order
//   POST /api/v1/rules/{name}   adjust one rule (422 when refused)
//   POST /api/v1/layers         overlay new decision-layer outputs
//   POST /api/v1/rule-context   replace the rule context
//   POST /api/v1/evaluate       run one orchestrator cycle now
//   GET  /api/v1/decisions      recent orchestrator and routing decisions
//   GET  /api/v1/ws             live decision feed
//
// CORS is permissive; tighten `allow_origin` when exposed beyond localhost.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::{AppState, RuleConfigView};
use crate::error::CoreError;
use crate::fusion::{LayerSnapshot, LayerSource};
use crate::orchestrator::ExoDecision;
use crate::routing::{FinalDecision, SignalOrigin};
use crate::rules::{RuleAdjustment, RuleContext};

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/signals", post(route_signal))
        .route("/api/v1/rules", get(list_rules))
        .route("/api/v1/rules/{name}", post(adjust_rule))
        .route("/api/v1/layers", post(update_layers))
        .route("/api/v1/rule-context", post(set_rule_context))
        .route("/api/v1/evaluate", post(evaluate))
        .route("/api/v1/decisions", get(decisions))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Full state snapshot
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Signal routing
// =============================================================================

#[derive(Deserialize)]
struct RouteRequest {
    #[serde(rename = "type")]
    signal_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(flatten)]
    origin: SignalOrigin,
}

async fn route_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<FinalDecision>, ApiError> {
    match state
        .route_signal(&req.signal_type, req.payload, req.origin)
        .await
    {
        Ok(decision) => Ok(Json(decision)),
        Err(e @ CoreError::UnmappedSignalType(_)) => {
            warn!(signal = %req.signal_type, "rejected signal with unmapped type");
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// =============================================================================
// Rule administration
// =============================================================================

async fn list_rules(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(RuleConfigView::collect(&state.rule_engine))
}

async fn adjust_rule(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(adjustment): Json<RuleAdjustment>,
) -> Result<Json<RuleConfigView>, ApiError> {
    match state.adjust_rule(&name, adjustment) {
        Ok(config) => {
            info!(rule = %name, threshold = config.threshold, enabled = config.enabled, "rule adjusted via API");
            Ok(Json(RuleConfigView { name, config }))
        }
        // The store has already logged the refusal.
        Err(e) => Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())),
    }
}

// =============================================================================
// Inputs
// =============================================================================

async fn update_layers(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<LayerSnapshot>,
) -> impl IntoResponse {
    state.update_layers(update);
    Json(state.layers.snapshot())
}

async fn set_rule_context(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(ctx): Json<RuleContext>,
) -> impl IntoResponse {
    state.set_rule_context(ctx.clone());
    Json(ctx)
}

// =============================================================================
// Evaluation
// =============================================================================

async fn evaluate(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExoDecision>, ApiError> {
    match state.run_cycle() {
        Ok(decision) => Ok(Json(decision)),
        Err(e @ CoreError::MissingUpstreamLayer(_)) => {
            Err(api_error(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[derive(Serialize)]
struct DecisionsResponse {
    decisions: Vec<ExoDecision>,
    routes: Vec<FinalDecision>,
}

async fn decisions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(DecisionsResponse {
        decisions: state.recent_decisions.read().clone(),
        routes: state.recent_routes.read().clone(),
    })
}

// =============================================================================
// Tests
// =============================================================================
