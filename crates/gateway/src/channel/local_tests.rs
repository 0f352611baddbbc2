// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::json;

use super::{HeartbeatLocalService, LocalRegistry, SessionLocalService};
use crate::error::GatewayError;
use crate::messaging::{now_nanos, Action};
use crate::registry::Service;
use crate::session::SessionStore;
use crate::test_support::MemorySessionStore;

fn store() -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::new())
}

// ── heartbeat ────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_echoes_client_timestamp_with_server_time() -> anyhow::Result<()> {
    let service = HeartbeatLocalService::new();
    let action = Action::new("channel.heartbeat.ping", "s-1", json!({"clientSent": 1000000}));

    let event = service
        .handle(&action.key.clone(), &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("ping must produce a reply"))?;

    assert_eq!(event.key, "channel.heartbeat.received");
    assert_eq!(event.payload["clientSent"], 1000000);
    let server_sent = event.payload["serverSent"].as_i64().unwrap_or(0);
    assert!(server_sent > 0);
    assert!(server_sent <= now_nanos());
    Ok(())
}

#[tokio::test]
async fn ping_without_client_timestamp_yields_error_event() -> anyhow::Result<()> {
    let service = HeartbeatLocalService::new();

    for payload in [json!({}), json!({"clientSent": "not a number"}), json!(null)] {
        let action = Action::new("channel.heartbeat.ping", "s-1", payload);
        let event = service
            .handle(&action.key.clone(), &action)
            .await?
            .ok_or_else(|| anyhow::anyhow!("bad ping still produces a reply"))?;
        assert_eq!(event.key, "channel.heartbeat.error");
    }
    Ok(())
}

#[tokio::test]
async fn heartbeat_rejects_unknown_keys() {
    let service = HeartbeatLocalService::new();
    let action = Action::new("channel.heartbeat.flatline", "s-1", json!({}));
    assert!(service.handle("channel.heartbeat.flatline", &action).await.is_err());
}

// ── session ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_announces_the_player_session() -> anyhow::Result<()> {
    let service = SessionLocalService::new(store());
    let action = Action::new("channel.session.start", "s-42", json!({}));

    let event = service
        .handle("channel.session.start", &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("start must produce a reply"))?;

    assert_eq!(event.key, "channel.session.started");
    assert_eq!(event.payload["sessionID"], "s-42");
    Ok(())
}

#[tokio::test]
async fn rejoin_migrates_old_state_and_destroys_the_old_session() -> anyhow::Result<()> {
    let store = store();

    store.start("old-a").await?;
    let mut old = store.load("old-a").await?;
    store.set_key(&mut old, "score", json!(7)).await?;

    store.start("new-b").await?;

    let service = SessionLocalService::new(store.clone());
    let action =
        Action::new("channel.session.rejoin", "new-b", json!({"oldSessionID": "old-a"}));
    let event = service
        .handle("channel.session.rejoin", &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("rejoin must produce a reply"))?;

    assert_eq!(event.key, "channel.session.rejoined");
    assert_eq!(event.payload["sessionID"], "new-b");
    assert_eq!(event.payload["migratedKeys"], 1);

    let merged = store.load("new-b").await?;
    assert_eq!(merged.get("score"), Some(&json!(7)));
    assert!(matches!(
        store.load("old-a").await,
        Err(GatewayError::SessionNotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn rejoin_of_unknown_session_fails_softly() -> anyhow::Result<()> {
    let store = store();
    store.start("new-b").await?;

    let service = SessionLocalService::new(store);
    let action =
        Action::new("channel.session.rejoin", "new-b", json!({"oldSessionID": "ghost"}));
    let event = service
        .handle("channel.session.rejoin", &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("failed rejoin still produces a reply"))?;

    assert_eq!(event.key, "channel.session.rejoin-failed");
    Ok(())
}

#[tokio::test]
async fn rejoin_without_old_session_id_fails_softly() -> anyhow::Result<()> {
    let service = SessionLocalService::new(store());
    let action = Action::new("channel.session.rejoin", "new-b", json!({}));

    let event = service
        .handle("channel.session.rejoin", &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("bad rejoin still produces a reply"))?;
    assert_eq!(event.key, "channel.session.rejoin-failed");
    Ok(())
}

// ── registry ─────────────────────────────────────────────────────────────

#[test]
fn resolve_picks_the_service_by_key_prefix() {
    let registry = LocalRegistry::with_builtin_services(store());

    let session = registry.resolve("channel.session.start");
    assert_eq!(
        session.map(|s| s.details().namespace),
        Some("channel.session".to_owned())
    );

    let heartbeat = registry.resolve("channel.heartbeat.ping");
    assert_eq!(
        heartbeat.map(|s| s.details().namespace),
        Some("channel.heartbeat".to_owned())
    );

    assert!(registry.resolve("channel.unknown.thing").is_none());
    assert!(registry.resolve("channel").is_none());
}
