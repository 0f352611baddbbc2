// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subject-addressed pub/sub with request/reply and queue groups.
//!
//! The dispatch plane only depends on the [`Bus`] trait; production wires in
//! [`NatsBus`], tests use the in-memory bus from [`crate::test_support`].
//! Subjects are dot-hierarchical with NATS wildcard semantics: `*` matches
//! exactly one segment, `>` matches one or more trailing segments.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::error::GatewayError;

/// Fan-out subject for unsolicited events from services to all channels.
pub const EVENTS_SUBJECT: &str = "level.events";

/// Queue group shared by all non-sticky instances of a service namespace.
pub const DEFAULT_QUEUE_GROUP: &str = "default";

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    /// Reply subject for request/reply traffic, when the sender expects one.
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Stream of messages for one subscription. Delivery within a single subject
/// is FIFO per subscriber; nothing is ordered across subjects.
pub type MessageStream = BoxStream<'static, BusMessage>;

/// Capability contract the core requires of the underlying message bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Fire-and-forget delivery to all subscribers of `subject`.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), GatewayError>;

    /// Synchronous request; resolves with the reply payload, or
    /// [`GatewayError::Timeout`] / [`GatewayError::NoSubscribers`].
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, GatewayError>;

    /// Every subscriber receives a copy of each matching message.
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, GatewayError>;

    /// Among subscribers sharing `group`, exactly one receives each message.
    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<MessageStream, GatewayError>;

    /// Drain and close the connection. Idempotent.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Whether a subscription `pattern` accepts `subject`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (None, None) => return true,
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            _ => return false,
        }
    }
}

/// Production bus over a NATS connection.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the NATS server at `url`.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        tracing::info!(url, "connecting to NATS");
        let client = async_nats::connect(url).await.map_err(GatewayError::transport)?;
        tracing::info!("NATS connected");
        Ok(Self { client })
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), GatewayError> {
        self.client
            .publish(subject.to_owned(), payload)
            .await
            .map_err(GatewayError::transport)
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, GatewayError> {
        let request = self.client.request(subject.to_owned(), payload);
        match tokio::time::timeout(timeout, request).await {
            Err(_) => Err(GatewayError::Timeout { subject: subject.to_owned() }),
            Ok(Ok(msg)) => Ok(msg.payload),
            Ok(Err(err)) => match err.kind() {
                async_nats::RequestErrorKind::NoResponders => {
                    Err(GatewayError::NoSubscribers { subject: subject.to_owned() })
                }
                async_nats::RequestErrorKind::TimedOut => {
                    Err(GatewayError::Timeout { subject: subject.to_owned() })
                }
                async_nats::RequestErrorKind::Other => Err(GatewayError::transport(err)),
            },
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, GatewayError> {
        let sub = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(GatewayError::transport)?;
        Ok(sub.map(into_bus_message).boxed())
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<MessageStream, GatewayError> {
        let sub = self
            .client
            .queue_subscribe(subject.to_owned(), group.to_owned())
            .await
            .map_err(GatewayError::transport)?;
        Ok(sub.map(into_bus_message).boxed())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.client.drain().await.map_err(GatewayError::transport)
    }
}

fn into_bus_message(msg: async_nats::Message) -> BusMessage {
    BusMessage {
        subject: msg.subject.to_string(),
        reply: msg.reply.map(|r| r.to_string()),
        payload: msg.payload,
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
