// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection WebSocket handling.
//!
//! One reader loop per connection; dispatches run as spawned tasks and post
//! their replies to an outbound queue drained by the same select loop, so all
//! socket writes are serialized. Replies reach the client in bus-completion
//! order, not receive order — clients needing strict ordering keep a single
//! action in flight.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::{ChannelState, Player};
use crate::messaging::{Action, Event};

/// `GET /ws` — upgrade a player connection.
pub async fn ws_handler(
    State(state): State<Arc<ChannelState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<ChannelState>, socket: WebSocket) {
    let session_id = Uuid::new_v4().to_string();

    // A failed store call aborts setup; the connection never goes active.
    if let Err(e) = state.store.start(&session_id).await {
        tracing::error!(session_id, err = %e, "session start failed, closing connection");
        return;
    }

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let player = Arc::new(Player {
        session_id: session_id.clone(),
        outbound,
        cancel: state.shutdown.child_token(),
    });
    if let Err(e) = state.register_player(Arc::clone(&player)).await {
        tracing::error!(session_id, err = %e, "player registration rejected");
        return;
    }

    // First event on every connection, ahead of anything else the player
    // might receive.
    player.send(Event::new("channel.session.started", json!({"sessionID": &session_id})));
    tracing::debug!(session_id, "player active");

    run_connection(&state, &player, socket, outbound_rx).await;

    state.unregister_player(&session_id).await;
    tracing::debug!(session_id, "player disconnected");
}

async fn run_connection(
    state: &Arc<ChannelState>,
    player: &Arc<Player>,
    socket: WebSocket,
    mut outbound_rx: mpsc::UnboundedReceiver<Event>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let pong_timeout = state.config.pong_timeout();
    let mut keepalive = tokio::time::interval(pong_timeout / 3);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = player.cancel.cancelled() => break,

            _ = keepalive.tick() => {
                if last_seen.elapsed() > pong_timeout {
                    tracing::info!(
                        session_id = %player.session_id,
                        "connection silent past pong timeout"
                    );
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            // All socket writes funnel through this one arm.
            event = outbound_rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(key = %event.key, err = %e, "event serialization failed");
                    }
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        accept_frame(state, player, text.as_str());
                    }
                    Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(
                            session_id = %player.session_id,
                            err = %e,
                            "socket read failed"
                        );
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Parse one inbound frame and spawn its dispatch. Malformed input never
/// disconnects the player.
fn accept_frame(state: &Arc<ChannelState>, player: &Arc<Player>, raw: &str) {
    let action: Action = match serde_json::from_str(raw) {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(session_id = %player.session_id, err = %e, "dropping malformed action");
            return;
        }
    };

    let state = Arc::clone(state);
    let player = Arc::clone(player);
    tokio::spawn(async move {
        dispatch(state, player, action).await;
    });
}

async fn dispatch(state: Arc<ChannelState>, player: Arc<Player>, action: Action) {
    if action.key.starts_with("channel.") {
        dispatch_local(&state, &player, &action).await;
        return;
    }

    let payload = match serde_json::to_vec(&action) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(key = %action.key, err = %e, "action serialization failed");
            return;
        }
    };

    let request = state.bus.request(&action.key, payload.into(), state.config.action_timeout());
    let result = tokio::select! {
        _ = player.cancel.cancelled() => return,
        result = request => result,
    };

    match result {
        Ok(bytes) => match serde_json::from_slice::<Event>(&bytes) {
            Ok(event) => {
                player.send(event);
            }
            Err(e) => {
                tracing::warn!(key = %action.key, err = %e, "dropping malformed event reply");
            }
        },
        // Timeouts and missing subscribers drop the reply; the client sees
        // silence and stays connected.
        Err(e) if e.drops_reply() => {
            tracing::info!(key = %action.key, err = %e, "dropping action reply");
        }
        Err(e) => {
            tracing::warn!(key = %action.key, err = %e, "bus request failed");
        }
    }
}

/// `channel.*` actions short-circuit the bus and answer from the in-process
/// registry. Same handler contract, same drop policies.
async fn dispatch_local(state: &ChannelState, player: &Player, action: &Action) {
    let Some(service) = state.locals.resolve(&action.key) else {
        tracing::warn!(key = %action.key, "no local service for action");
        return;
    };

    match service.handle(&action.key, action).await {
        Ok(Some(event)) => {
            player.send(event);
        }
        Ok(None) => {
            tracing::warn!(key = %action.key, "local handler returned no event");
        }
        Err(e) => {
            tracing::error!(key = %action.key, err = %e, "local handler failed");
        }
    }
}
