// =============================================================================
// Scoring Engines — the black boxes the router consults
// =============================================================================
//
// The core never looks inside an engine. It only needs:
//   - a stable identifier,
//   - a capability entry (which signal types it handles, a latency hint),
//   - an async query returning an EngineResponse.
//
// Engines are registered once at startup. An engine missing from the registry
// is a checked state: the broadcaster synthesizes a rejection for it instead
// of attempting a call.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routing::signal::{Signal, SignalType};

/// Identifier of a scoring engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One engine's verdict on a signal, real or synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    pub engine: EngineId,
    pub approved: bool,
    /// 0–100.
    pub confidence: f64,
    pub reasoning: String,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Suggested adjustments to the signal's action, if the engine has any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<serde_json::Value>,
    /// True when the broadcaster produced this response on the engine's behalf.
    #[serde(default)]
    pub synthetic: bool,
}

impl EngineResponse {
    /// Zero-confidence rejection recorded for an engine that did not answer.
    pub fn synthetic_failure(engine: EngineId, reasoning: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            engine,
            approved: false,
            confidence: 0.0,
            reasoning: reasoning.into(),
            processing_time_ms: elapsed_ms,
            timestamp: Utc::now(),
            modifications: None,
            synthetic: true,
        }
    }

    /// Force the response into the documented ranges and bind it to the
    /// engine that was actually queried.
    pub(crate) fn normalised(mut self, engine: &EngineId, elapsed_ms: u64) -> Self {
        self.engine = engine.clone();
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.processing_time_ms = elapsed_ms;
        self.synthetic = false;
        self
    }
}

/// What an engine declares it can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapability {
    pub can_handle: Vec<SignalType>,
    /// Typical latency; informational only.
    #[serde(default)]
    pub response_time_ms: u64,
}

impl EngineCapability {
    pub fn handles(&self, signal_type: SignalType) -> bool {
        self.can_handle.contains(&signal_type)
    }
}

/// Interface every scoring engine implements.
///
/// Implementations should honour `timeout` themselves where they can; the
/// broadcaster enforces it regardless.
#[async_trait]
pub trait ScoringEngine: Send + Sync {
    async fn query(&self, signal: &Signal, timeout: Duration) -> anyhow::Result<EngineResponse>;
}

pub struct RegisteredEngine {
    pub capability: EngineCapability,
    pub engine: Arc<dyn ScoringEngine>,
}

/// Capability table populated at startup.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<EngineId, RegisteredEngine>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an engine.
    pub fn register(
        &mut self,
        id: impl Into<EngineId>,
        capability: EngineCapability,
        engine: Arc<dyn ScoringEngine>,
    ) {
        self.engines
            .insert(id.into(), RegisteredEngine { capability, engine });
    }

    pub fn get(&self, id: &EngineId) -> Option<&RegisteredEngine> {
        self.engines.get(id)
    }

    pub fn contains(&self, id: &EngineId) -> bool {
        self.engines.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Registered engine ids, sorted.
    pub fn ids(&self) -> Vec<EngineId> {
        let mut ids: Vec<EngineId> = self.engines.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl From<String> for EngineId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalised_clamps_confidence_and_rebinds_engine() {
        let raw = EngineResponse {
            engine: EngineId::new("impostor"),
            approved: true,
            confidence: 140.0,
            reasoning: "ok".into(),
            processing_time_ms: 0,
            timestamp: Utc::now(),
            modifications: None,
            synthetic: true,
        };
        let id = EngineId::new("strategy_core");
        let r = raw.normalised(&id, 12);
        assert_eq!(r.engine, id);
        assert!((r.confidence - 100.0).abs() < f64::EPSILON);
        assert_eq!(r.processing_time_ms, 12);
        assert!(!r.synthetic);
    }

    #[test]
    fn nan_confidence_becomes_zero() {
        let raw = EngineResponse::synthetic_failure(EngineId::new("x"), "", 0);
        let r = EngineResponse {
            confidence: f64::NAN,
            ..raw
        }
        .normalised(&EngineId::new("x"), 1);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn synthetic_failure_is_zero_confidence_rejection() {
        let r = EngineResponse::synthetic_failure(EngineId::new("timing_gate"), "timeout", 250);
        assert!(!r.approved);
        assert_eq!(r.confidence, 0.0);
        assert!(r.synthetic);
        assert_eq!(r.processing_time_ms, 250);
    }

    #[test]
    fn capability_lookup() {
        let cap = EngineCapability {
            can_handle: vec![SignalType::Breakout],
            response_time_ms: 40,
        };
        assert!(cap.handles(SignalType::Breakout));
        assert!(!cap.handles(SignalType::FlashCrash));
    }
}
