// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rally: real-time game-server gateway.
//!
//! Players hold a persistent WebSocket to a channel edge node; actions
//! addressed by dot-hierarchical keys are routed over a shared message bus to
//! service workers, whose replies stream back as events. Per-player session
//! state lives in a shared TTL'd store so any channel in the fleet can resume
//! a player.

pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod messaging;
pub mod registry;
pub mod session;
pub mod test_support;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, NatsBus};
use crate::channel::{build_router, spawn_broadcast_listener, ChannelState};
use crate::config::GatewayConfig;
use crate::session::{RedisSessionStore, SessionStore};

/// Connect the production bus and store, then run the channel until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let bus: Arc<dyn Bus> = Arc::new(NatsBus::connect(&config.channel.services.nats.url).await?);
    let redis = &config.channel.services.redis;
    let store: Arc<dyn SessionStore> = Arc::new(
        RedisSessionStore::connect(
            &redis.host,
            redis.port,
            &redis.password,
            redis.db,
            config.channel.services.session_manager.expiration,
        )
        .await?,
    );

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    let state = Arc::new(ChannelState::new(config, bus, store, shutdown.clone()));

    // Ctrl-C drains the server and cancels every connection underneath it.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    tracing::info!("channel listening on {addr}");
    serve(state, listener).await
}

/// Serve an already-bound listener with the given channel state. Split from
/// [`run`] so tests can wire in their own bus, store, and port.
pub async fn serve(state: Arc<ChannelState>, listener: TcpListener) -> anyhow::Result<()> {
    spawn_broadcast_listener(Arc::clone(&state));
    let shutdown = state.shutdown.clone();
    let router = build_router(state);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    Ok(())
}
