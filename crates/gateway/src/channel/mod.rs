// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The channel: edge process owning client WebSocket connections.
//!
//! Terminates duplex client transport, translates inbound actions into bus
//! requests (or short-circuits `channel.*` keys to in-process local
//! services), streams replies back, and fans bus-wide broadcast events out to
//! every connected player.

pub mod http;
pub mod local;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bus::{Bus, EVENTS_SUBJECT};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::messaging::Event;
use crate::session::SessionStore;

use self::local::LocalRegistry;

/// Ephemeral channel-local record for one connected player.
///
/// Owned exclusively by the channel instance; created on successful upgrade
/// plus session start, destroyed on disconnect.
pub struct Player {
    pub session_id: String,
    outbound: mpsc::UnboundedSender<Event>,
    /// Cancels in-flight dispatches when the connection tears down.
    pub cancel: CancellationToken,
}

impl Player {
    /// Queue an event for the connection's single writer. Returns false when
    /// the connection is already gone.
    pub fn send(&self, event: Event) -> bool {
        self.outbound.send(event).is_ok()
    }
}

/// Shared channel state.
pub struct ChannelState {
    pub config: GatewayConfig,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn SessionStore>,
    /// Connected players by session ID. Written on connect/disconnect, read
    /// on broadcast.
    pub players: RwLock<HashMap<String, Arc<Player>>>,
    pub locals: LocalRegistry,
    pub shutdown: CancellationToken,
}

impl ChannelState {
    pub fn new(
        config: GatewayConfig,
        bus: Arc<dyn Bus>,
        store: Arc<dyn SessionStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let locals = LocalRegistry::with_builtin_services(Arc::clone(&store));
        Self {
            config,
            bus,
            store,
            players: RwLock::new(HashMap::new()),
            locals,
            shutdown,
        }
    }

    /// Bind a player to its session ID. A second concurrent binding of the
    /// same session is rejected.
    pub async fn register_player(&self, player: Arc<Player>) -> Result<(), GatewayError> {
        let mut players = self.players.write().await;
        if players.contains_key(&player.session_id) {
            return Err(GatewayError::Transport(format!(
                "session {} is already bound to a connection",
                player.session_id
            )));
        }
        players.insert(player.session_id.clone(), player);
        Ok(())
    }

    pub async fn unregister_player(&self, session_id: &str) {
        if let Some(player) = self.players.write().await.remove(session_id) {
            player.cancel.cancel();
        }
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    /// Fan an event out to every connected player.
    pub async fn broadcast(&self, event: Event) {
        let players = self.players.read().await;
        for player in players.values() {
            player.send(event.clone());
        }
    }
}

/// Subscribe the fan-out subject and forward each event to all connected
/// players until shutdown.
pub fn spawn_broadcast_listener(state: Arc<ChannelState>) {
    tokio::spawn(async move {
        let mut stream = match state.bus.subscribe(EVENTS_SUBJECT).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(err = %e, "broadcast subscription failed");
                return;
            }
        };
        tracing::debug!(subject = EVENTS_SUBJECT, "broadcast listener running");

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                msg = stream.next() => {
                    let Some(msg) = msg else { break };
                    match serde_json::from_slice::<Event>(&msg.payload) {
                        Ok(event) => state.broadcast(event).await,
                        Err(e) => {
                            tracing::warn!(err = %e, "dropping malformed broadcast event");
                        }
                    }
                }
            }
        }
        tracing::debug!("broadcast listener stopped");
    });
}

/// Build the axum router with the healthcheck and WebSocket routes.
pub fn build_router(state: Arc<ChannelState>) -> Router {
    Router::new()
        .route("/healthcheck", get(http::healthcheck))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
