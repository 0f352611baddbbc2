// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process services answering `channel.*` actions without a bus roundtrip.
//!
//! Local services implement the same [`Service`] contract as bus-registered
//! ones; the dispatcher treats both uniformly. Lookup is by the first two
//! dot-segments of the action key (`channel.session`, `channel.heartbeat`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::GatewayError;
use crate::messaging::{now_nanos, Action, Event};
use crate::registry::{Service, ServiceDescriptor};
use crate::session::SessionStore;

/// Registry of in-process services, keyed by their descriptor namespace.
pub struct LocalRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self { services: HashMap::new() }
    }

    /// Registry preloaded with the two required local services.
    pub fn with_builtin_services(store: Arc<dyn SessionStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SessionLocalService::new(store)));
        registry.register(Arc::new(HeartbeatLocalService::new()));
        registry
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.insert(service.details().namespace, service);
    }

    /// Service owning `key`, resolved by its first two dot-segments.
    pub fn resolve(&self, key: &str) -> Option<&Arc<dyn Service>> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        let second = segments.next()?;
        self.services.get(&format!("{first}.{second}"))
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Session lifecycle for connected players: start notifications and rejoin
/// merges across reconnects.
pub struct SessionLocalService {
    store: Arc<dyn SessionStore>,
    details: ServiceDescriptor,
}

impl SessionLocalService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            details: ServiceDescriptor::new(
                "channel.session",
                "session",
                "Session lifecycle for connected players.",
                env!("CARGO_PKG_VERSION"),
                false,
            ),
        }
    }

    async fn rejoin(&self, action: &Action) -> anyhow::Result<Option<Event>> {
        let Some(old_session_id) = action.payload.get("oldSessionID").and_then(|v| v.as_str())
        else {
            return Ok(Some(Event::new(
                "channel.session.rejoin-failed",
                json!({"reason": "payload must carry oldSessionID"}),
            )));
        };

        match self.store.merge(old_session_id, &action.session_id).await {
            Ok(migrated) => Ok(Some(Event::new(
                "channel.session.rejoined",
                json!({"sessionID": &action.session_id, "migratedKeys": migrated}),
            ))),
            Err(GatewayError::SessionNotFound { session_id }) => Ok(Some(Event::new(
                "channel.session.rejoin-failed",
                json!({"reason": format!("session {session_id} was not found")}),
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Service for SessionLocalService {
    fn details(&self) -> ServiceDescriptor {
        self.details.clone()
    }

    async fn handle(&self, _subject: &str, action: &Action) -> anyhow::Result<Option<Event>> {
        match action.key.as_str() {
            "channel.session.start" => Ok(Some(Event::new(
                "channel.session.started",
                json!({"sessionID": &action.session_id}),
            ))),
            "channel.session.rejoin" => self.rejoin(action).await,
            other => anyhow::bail!("cannot process action identified by {other}"),
        }
    }
}

/// Latency echo: answers pings immediately with both timestamps.
pub struct HeartbeatLocalService {
    details: ServiceDescriptor,
}

impl HeartbeatLocalService {
    pub fn new() -> Self {
        Self {
            details: ServiceDescriptor::new(
                "channel.heartbeat",
                "heartbeat",
                "Connection latency echo.",
                env!("CARGO_PKG_VERSION"),
                false,
            ),
        }
    }
}

impl Default for HeartbeatLocalService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service for HeartbeatLocalService {
    fn details(&self) -> ServiceDescriptor {
        self.details.clone()
    }

    async fn handle(&self, _subject: &str, action: &Action) -> anyhow::Result<Option<Event>> {
        match action.key.as_str() {
            "channel.heartbeat.ping" => {
                // A missing or mistyped payload still gets a reply, never a
                // silent drop.
                match action.payload.get("clientSent").and_then(|v| v.as_i64()) {
                    Some(client_sent) => Ok(Some(Event::new(
                        "channel.heartbeat.received",
                        json!({"clientSent": client_sent, "serverSent": now_nanos()}),
                    ))),
                    None => Ok(Some(Event::new(
                        "channel.heartbeat.error",
                        json!({"reason": "payload must carry clientSent nanoseconds"}),
                    ))),
                }
            }
            other => anyhow::bail!("cannot process action identified by {other}"),
        }
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
