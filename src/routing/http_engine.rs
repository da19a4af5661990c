// =============================================================================
// HTTP Engine — a scoring engine that lives behind a JSON endpoint
// =============================================================================
//
// POST {endpoint}/query with the signal as a flat JSON object. The remote side
// answers with a flat EngineResponse object; `engine`, `timestamp` and
// `processing_time_ms` may be omitted and are filled in locally.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::routing::engine::{EngineId, EngineResponse, ScoringEngine};
use crate::routing::signal::Signal;

/// Wire shape of a remote engine's answer.
#[derive(Debug, Deserialize)]
struct RemoteVerdict {
    approved: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    modifications: Option<serde_json::Value>,
}

pub struct HttpEngine {
    id: EngineId,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new(id: EngineId, endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for engine")?;
        Ok(Self {
            id,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn query_url(&self) -> String {
        format!("{}/query", self.endpoint)
    }
}

#[async_trait]
impl ScoringEngine for HttpEngine {
    async fn query(&self, signal: &Signal, timeout: Duration) -> Result<EngineResponse> {
        let resp = self
            .client
            .post(self.query_url())
            .timeout(timeout)
            .json(signal)
            .send()
            .await
            .with_context(|| format!("engine {} unreachable", self.id))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("engine {} answered HTTP {}", self.id, status);
        }

        let verdict: RemoteVerdict = resp
            .json()
            .await
            .with_context(|| format!("engine {} sent an unreadable verdict", self.id))?;

        Ok(EngineResponse {
            engine: self.id.clone(),
            approved: verdict.approved,
            confidence: verdict.confidence,
            reasoning: verdict.reasoning,
            processing_time_ms: 0,
            timestamp: verdict.timestamp.unwrap_or_else(Utc::now),
            modifications: verdict.modifications,
            synthetic: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_url_strips_trailing_slash() {
        let e = HttpEngine::new(EngineId::new("timing_gate"), "http://10.0.0.5:7000/").unwrap();
        assert_eq!(e.query_url(), "http://10.0.0.5:7000/query");
    }

    #[test]
    fn remote_verdict_accepts_minimal_body() {
        let v: RemoteVerdict = serde_json::from_str(r#"{ "approved": true }"#).unwrap();
        assert!(v.approved);
        assert_eq!(v.confidence, 0.0);
        assert!(v.modifications.is_none());
    }

    #[tokio::test]
    async fn queries_remote_engine_over_json() {
        use axum::{routing::post, Json, Router};

        let app = Router::new().route(
            "/query",
            post(|Json(body): Json<serde_json::Value>| async move {
                let approved = body["type"] == "BREAKOUT";
                Json(serde_json::json!({
                    "approved": approved,
                    "confidence": 64.5,
                    "reasoning": format!("saw {}", body["type"]),
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let e = HttpEngine::new(EngineId::new("strategy_core"), format!("http://{addr}")).unwrap();
        let signal = crate::routing::broadcaster::tests::signal(
            crate::routing::signal::SignalType::Breakout,
        );
        let resp = e.query(&signal, Duration::from_secs(2)).await.unwrap();
        assert!(resp.approved);
        assert_eq!(resp.engine, EngineId::new("strategy_core"));
        assert!((resp.confidence - 64.5).abs() < 1e-9);
        assert!(resp.reasoning.contains("BREAKOUT"));
        assert!(!resp.synthetic);
    }

    #[tokio::test]
    async fn unreachable_engine_is_an_error_not_a_panic() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let e = HttpEngine::new(EngineId::new("ghost"), "http://127.0.0.1:9").unwrap();
        let signal = crate::routing::broadcaster::tests::signal(
            crate::routing::signal::SignalType::Breakout,
        );
        assert!(e.query(&signal, Duration::from_millis(200)).await.is_err());
    }
}
