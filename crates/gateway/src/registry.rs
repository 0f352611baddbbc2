// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service runtime: binds action-key subscriptions to handlers.
//!
//! A service is a small capability record — a descriptor plus a handle
//! function — rather than a deep trait hierarchy. The registry computes the
//! subscription subject from the descriptor, consumes the queue, invokes the
//! handler concurrently across messages, and publishes each returned event to
//! the bus-supplied reply subject. Exactly one event is produced per action,
//! or none when the handler fails.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Bus, BusMessage, DEFAULT_QUEUE_GROUP};
use crate::error::GatewayError;
use crate::messaging::{Action, Event};

/// Identity and routing properties of one service instance.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub service_id: Uuid,
    /// Action-key namespace this service consumes (e.g. `tictactoe.gameplay`).
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub version: String,
    /// Sticky services pin actions to this specific instance.
    pub sticky: bool,
}

impl ServiceDescriptor {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
        sticky: bool,
    ) -> Self {
        Self {
            service_id: Uuid::new_v4(),
            namespace: namespace.into(),
            name: name.into(),
            description: description.into(),
            version: version.into(),
            sticky,
        }
    }

    /// Bus subject this instance subscribes on: `<namespace>.<serviceID>` when
    /// sticky, otherwise the namespace-wide `<namespace>.>`.
    pub fn subscription_subject(&self) -> String {
        if self.sticky {
            format!("{}.{}", self.namespace, self.service_id)
        } else {
            format!("{}.>", self.namespace)
        }
    }
}

/// Contract implemented by every service, bus-registered or channel-local.
#[async_trait]
pub trait Service: Send + Sync {
    fn details(&self) -> ServiceDescriptor;

    /// Handle one action. `Ok(Some(event))` replies with the event;
    /// `Ok(None)` and `Err` drop the reply (the requester times out).
    async fn handle(&self, subject: &str, action: &Action) -> anyhow::Result<Option<Event>>;
}

/// Registry binding services to their bus subscriptions.
pub struct ServiceRegistry {
    bus: Arc<dyn Bus>,
    shutdown: CancellationToken,
}

impl ServiceRegistry {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus, shutdown: CancellationToken::new() }
    }

    /// Subscribe the service on its descriptor-derived subject and start
    /// consuming. Non-sticky instances of one namespace share the `default`
    /// queue group, so each action reaches exactly one of them.
    pub async fn register(&self, service: Arc<dyn Service>) -> Result<(), GatewayError> {
        let details = service.details();
        let subject = details.subscription_subject();
        tracing::debug!(
            service = %details.name,
            service_id = %details.service_id,
            subject = %subject,
            sticky = details.sticky,
            "registering service"
        );

        let mut stream = self.bus.queue_subscribe(&subject, DEFAULT_QUEUE_GROUP).await?;
        let bus = Arc::clone(&self.bus);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else { break };
                        tokio::spawn(consume(Arc::clone(&bus), Arc::clone(&service), msg));
                    }
                }
            }
            tracing::debug!(service = %details.name, "service subscription ended");
        });

        Ok(())
    }

    /// Block until the registry is stopped.
    pub async fn listen(&self) {
        tracing::info!("service listening for messages");
        self.shutdown.cancelled().await;
    }

    /// Stop consuming and close the bus connection. Idempotent.
    pub async fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        if let Err(e) = self.bus.close().await {
            tracing::warn!(err = %e, "closing bus connection failed");
        }
    }
}

/// One message through one handler. Malformed actions, handler errors, and
/// missing events all drop the reply; the requester observes a timeout.
async fn consume(bus: Arc<dyn Bus>, service: Arc<dyn Service>, msg: BusMessage) {
    let action: Action = match serde_json::from_slice(&msg.payload) {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(subject = %msg.subject, err = %e, "dropping malformed action");
            return;
        }
    };

    tracing::debug!(subject = %msg.subject, key = %action.key, "handling action");
    let event = match service.handle(&msg.subject, &action).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::warn!(key = %action.key, "handler returned no event");
            return;
        }
        Err(e) => {
            tracing::error!(key = %action.key, err = %e, "handler failed");
            return;
        }
    };

    let Some(reply) = msg.reply else {
        tracing::debug!(key = %action.key, "no reply subject, event discarded");
        return;
    };
    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(key = %event.key, err = %e, "event serialization failed");
            return;
        }
    };
    if let Err(e) = bus.publish(&reply, payload.into()).await {
        tracing::warn!(key = %event.key, err = %e, "publishing reply failed");
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
