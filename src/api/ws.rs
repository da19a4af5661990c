// =============================================================================
// WebSocket Handler — push feed of new decisions
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. An immediate full StateSnapshot on connect.
//   2. Every new orchestrator decision and routed-signal decision as it is
//      recorded, tagged with a per-connection sequence number.
//
// A client that falls behind the broadcast buffer skips the missed events
// and is sent a fresh snapshot instead. Ping frames are answered with Pong.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::{AppState, FeedEvent};

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Validates the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(state.admin_token.as_deref(), &token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "Invalid or missing token",
        )
            .into_response();
    }

    info!("WebSocket connection accepted");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before the snapshot so nothing recorded in between is lost.
    let mut feed = state.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let mut sequence: u64 = 0;

    if let Err(e) = send_snapshot(&mut sender, &state, &mut sequence).await {
        warn!(error = %e, "failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            event = feed.recv() => {
                match event {
                    Ok(event) => {
                        sequence += 1;
                        state.ws_sequence_number.fetch_add(1, Ordering::Relaxed);
                        let Some(text) = encode_event(sequence, &event) else {
                            continue;
                        };
                        if let Err(e) = sender.send(Message::Text(text.into())).await {
                            debug!(error = %e, "WebSocket send failed, disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged, resending snapshot");
                        if send_snapshot(&mut sender, &state, &mut sequence).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error, disconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!(sent = sequence, "WebSocket connection closed");
}

/// Serialise a feed event with its sequence number. `None` if the event
/// cannot be serialised; that is skipped rather than treated as a disconnect.
fn encode_event(seq: u64, event: &FeedEvent) -> Option<String> {
    let mut value = match serde_json::to_value(event) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to serialise feed event");
            return None;
        }
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("seq".into(), seq.into());
    }
    Some(value.to_string())
}

async fn send_snapshot<S>(
    sender: &mut S,
    state: &Arc<AppState>,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    *sequence += 1;
    state.ws_sequence_number.fetch_add(1, Ordering::Relaxed);

    let snapshot = state.build_snapshot();
    let body = serde_json::json!({
        "kind": "snapshot",
        "seq": *sequence,
        "snapshot": snapshot,
    });
    sender.send(Message::Text(body.to_string().into())).await?;
    debug!(version = snapshot.state_version, seq = *sequence, "WebSocket snapshot sent");
    Ok(())
}
