// =============================================================================
// Broadcaster — concurrent fan-out of one signal to its target engines
// =============================================================================
//
// Every target engine is queried independently. Each query is wrapped in its
// own timeout, and the whole fan-out races a group deadline equal to the same
// timeout. When the deadline fires, the in-flight set is dropped: outstanding
// calls are cancelled and their late results can never be merged.
//
// No engine failure ever aborts a broadcast. Errors, timeouts, unregistered
// engines and engines that do not handle the signal type all become
// zero-confidence rejections that report the rule timeout as processing time.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::routing::engine::{EngineId, EngineRegistry, EngineResponse};
use crate::routing::signal::Signal;
use crate::routing::topology::RoutingRule;

/// Engine id → response, real or synthesized. Covers every target engine.
pub type ResponseMap = HashMap<EngineId, EngineResponse>;

pub struct Broadcaster {
    registry: Arc<EngineRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Query every target engine of `rule` and collect one response per
    /// engine. Returns within `rule.timeout_ms` plus scheduling overhead.
    pub async fn broadcast(&self, signal: &Signal, rule: &RoutingRule) -> ResponseMap {
        let timeout = rule.timeout();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut responses: ResponseMap = HashMap::with_capacity(rule.target_engines.len());
        let mut in_flight = FuturesUnordered::new();

        for engine_id in &rule.target_engines {
            let Some(registered) = self.registry.get(engine_id) else {
                warn!(engine = %engine_id, signal = %signal.signal_type, "target engine not registered");
                responses.insert(
                    engine_id.clone(),
                    EngineResponse::synthetic_failure(
                        engine_id.clone(),
                        "engine not registered",
                        timeout_ms(timeout),
                    ),
                );
                continue;
            };

            if !registered.capability.handles(signal.signal_type) {
                warn!(engine = %engine_id, signal = %signal.signal_type, "engine cannot handle signal type");
                responses.insert(
                    engine_id.clone(),
                    EngineResponse::synthetic_failure(
                        engine_id.clone(),
                        "engine cannot handle signal type",
                        timeout_ms(timeout),
                    ),
                );
                continue;
            }

            let engine = registered.engine.clone();
            let id = engine_id.clone();
            in_flight.push(async move {
                let call_started = Instant::now();
                let outcome = tokio::time::timeout(timeout, engine.query(signal, timeout)).await;
                let elapsed = elapsed_ms(call_started);
                let response = match outcome {
                    Ok(Ok(resp)) => resp.normalised(&id, elapsed),
                    Ok(Err(e)) => {
                        warn!(engine = %id, error = %e, "engine query failed");
                        EngineResponse::synthetic_failure(
                            id.clone(),
                            format!("error: {e}"),
                            timeout_ms(timeout),
                        )
                    }
                    Err(_) => {
                        warn!(engine = %id, timeout_ms = timeout.as_millis() as u64, "engine query timed out");
                        EngineResponse::synthetic_failure(id.clone(), "timeout", timeout_ms(timeout))
                    }
                };
                (id, response)
            });
        }

        let group_deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(group_deadline);

        while !in_flight.is_empty() {
            tokio::select! {
                biased;
                next = in_flight.next() => {
                    if let Some((id, response)) = next {
                        responses.insert(id, response);
                    }
                }
                _ = &mut group_deadline => {
                    warn!(
                        signal = %signal.signal_type,
                        outstanding = in_flight.len(),
                        "group deadline reached, abandoning outstanding engines"
                    );
                    break;
                }
            }
        }
        drop(in_flight);

        // Anything still unanswered was abandoned at the deadline.
        for engine_id in &rule.target_engines {
            responses.entry(engine_id.clone()).or_insert_with(|| {
                EngineResponse::synthetic_failure(engine_id.clone(), "timeout", timeout_ms(timeout))
            });
        }

        debug!(
            signal = %signal.signal_type,
            engines = responses.len(),
            elapsed_ms = elapsed_ms(started),
            "broadcast complete"
        );
        responses
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn timeout_ms(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}
