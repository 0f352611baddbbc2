// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fakes for the bus and the session store.
//!
//! [`MemoryBus`] implements the full [`Bus`] contract — wildcard subjects,
//! queue groups with round-robin delivery, `_INBOX`-style request/reply —
//! so dispatch-plane behavior can be exercised without a broker.
//! [`MemorySessionStore`] mirrors the store semantics (atomic merge,
//! no-overwrite copy, timestamp validation) over a mutexed map; TTL expiry is
//! not simulated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::bus::{subject_matches, Bus, BusMessage, MessageStream};
use crate::error::GatewayError;
use crate::messaging::now_nanos;
use crate::session::{
    serialize, session_from_hash, session_key, Session, SessionStore, LAST_UPDATED_FIELD,
};

// -- MemoryBus ----------------------------------------------------------------

struct SubEntry {
    id: u64,
    pattern: String,
    group: Option<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

struct BusInner {
    subs: Mutex<Vec<SubEntry>>,
    /// Round-robin cursor per queue group.
    cursors: Mutex<HashMap<String, usize>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

/// In-memory bus with NATS-like delivery semantics. Cloning shares the bus.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subs: Mutex::new(Vec::new()),
                cursors: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    async fn register(
        &self,
        pattern: &str,
        group: Option<&str>,
    ) -> (u64, mpsc::UnboundedReceiver<BusMessage>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subs.lock().await.push(SubEntry {
            id,
            pattern: pattern.to_owned(),
            group: group.map(str::to_owned),
            tx,
        });
        (id, rx)
    }

    async fn unregister(&self, id: u64) {
        self.inner.subs.lock().await.retain(|s| s.id != id);
    }

    /// Deliver to all matching plain subscribers and one member per matching
    /// queue group. Returns the number of deliveries made.
    async fn deliver(&self, msg: &BusMessage) -> usize {
        let mut delivered = 0;
        let mut grouped: HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>> = HashMap::new();

        {
            let mut subs = self.inner.subs.lock().await;
            subs.retain(|s| !s.tx.is_closed());
            for entry in subs.iter() {
                if !subject_matches(&entry.pattern, &msg.subject) {
                    continue;
                }
                match &entry.group {
                    None => {
                        if entry.tx.send(msg.clone()).is_ok() {
                            delivered += 1;
                        }
                    }
                    Some(group) => {
                        grouped.entry(group.clone()).or_default().push(entry.tx.clone());
                    }
                }
            }
        }

        if !grouped.is_empty() {
            let mut cursors = self.inner.cursors.lock().await;
            for (group, members) in grouped {
                let cursor = cursors.entry(group).or_insert(0);
                let pick = &members[*cursor % members.len()];
                *cursor = cursor.wrapping_add(1);
                if pick.send(msg.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    fn ensure_open(&self) -> Result<(), GatewayError> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(GatewayError::Transport("bus is closed".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), GatewayError> {
        self.ensure_open()?;
        let msg = BusMessage { subject: subject.to_owned(), reply: None, payload };
        self.deliver(&msg).await;
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, GatewayError> {
        self.ensure_open()?;

        let reply_subject = format!("_INBOX.{}", uuid::Uuid::new_v4());
        let (inbox_id, mut inbox_rx) = self.register(&reply_subject, None).await;

        let msg = BusMessage {
            subject: subject.to_owned(),
            reply: Some(reply_subject),
            payload,
        };
        let delivered = self.deliver(&msg).await;
        if delivered == 0 {
            self.unregister(inbox_id).await;
            return Err(GatewayError::NoSubscribers { subject: subject.to_owned() });
        }

        let reply = tokio::time::timeout(timeout, inbox_rx.recv()).await;
        self.unregister(inbox_id).await;
        match reply {
            Ok(Some(m)) => Ok(m.payload),
            Ok(None) | Err(_) => Err(GatewayError::Timeout { subject: subject.to_owned() }),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, GatewayError> {
        self.ensure_open()?;
        let (_, rx) = self.register(subject, None).await;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<MessageStream, GatewayError> {
        self.ensure_open()?;
        let (_, rx) = self.register(subject, Some(group)).await;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.subs.lock().await.clear();
        Ok(())
    }
}

// -- MemorySessionStore -------------------------------------------------------

/// Session store over a mutexed hash-of-hashes. Merge and multi-field writes
/// are atomic under the lock, matching the store contract.
#[derive(Default)]
pub struct MemorySessionStore {
    hashes: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw field count of a stored hash; 0 when the session does not exist.
    pub async fn field_count(&self, session_id: &str) -> usize {
        self.hashes
            .lock()
            .await
            .get(&session_key(session_id))
            .map(|h| h.len())
            .unwrap_or(0)
    }

    fn missing_timestamp(session_id: &str) -> GatewayError {
        GatewayError::MalformedPayload(format!(
            "session {session_id} has no {LAST_UPDATED_FIELD} timestamp"
        ))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn start(&self, session_id: &str) -> Result<(), GatewayError> {
        let mut hashes = self.hashes.lock().await;
        hashes
            .entry(session_key(session_id))
            .or_default()
            .insert(LAST_UPDATED_FIELD.to_owned(), now_nanos().to_string().into_bytes());
        Ok(())
    }

    async fn merge(
        &self,
        old_session_id: &str,
        new_session_id: &str,
    ) -> Result<u64, GatewayError> {
        let mut hashes = self.hashes.lock().await;

        let old = hashes.remove(&session_key(old_session_id));
        let old = match old {
            Some(h) if !h.is_empty() => h,
            _ => {
                return Err(GatewayError::SessionNotFound {
                    session_id: old_session_id.to_owned(),
                })
            }
        };

        let new = hashes.entry(session_key(new_session_id)).or_default();
        let mut copied = 0;
        for (field, value) in old {
            if !new.contains_key(&field) {
                new.insert(field, value);
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn load(&self, session_id: &str) -> Result<Session, GatewayError> {
        let hash = self
            .hashes
            .lock()
            .await
            .get(&session_key(session_id))
            .cloned()
            .unwrap_or_default();
        session_from_hash(session_id, hash)
    }

    async fn reload(&self, session: &mut Session) -> Result<(), GatewayError> {
        *session = self.load(&session.id).await?;
        Ok(())
    }

    async fn validate(&self, session: &Session) -> Result<bool, GatewayError> {
        let hashes = self.hashes.lock().await;
        let raw = hashes
            .get(&session_key(&session.id))
            .and_then(|h| h.get(LAST_UPDATED_FIELD))
            .ok_or_else(|| Self::missing_timestamp(&session.id))?;

        let stored: i64 = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Self::missing_timestamp(&session.id))?;

        Ok(stored == session.last_updated)
    }

    async fn set_key(
        &self,
        session: &mut Session,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let serialized = serialize(&session.id, &value)?;
        let timestamp = now_nanos();

        let mut hashes = self.hashes.lock().await;
        let hash = hashes.entry(session_key(&session.id)).or_default();
        hash.insert(key.to_owned(), serialized);
        hash.insert(LAST_UPDATED_FIELD.to_owned(), timestamp.to_string().into_bytes());
        drop(hashes);

        session.apply_write(key, value, timestamp);
        Ok(())
    }
}
