// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared, TTL'd per-player session state.
//!
//! A session is a hash of opaque values under `level:sessions:<sessionID>`,
//! plus the reserved `__last_updated__` nanosecond timestamp. Any channel in
//! the fleet can resume a player from the store. The [`SessionStore`] trait
//! carries exactly the operations the dispatch plane needs; production uses
//! [`RedisSessionStore`], tests the in-memory store from
//! [`crate::test_support`].
//!
//! Concurrency: `set_key` is the only mutator. Readers either `validate`
//! first and `reload` on staleness, or treat cached data as advisory. Racing
//! writers resolve last-writer-wins with a single coherent timestamp because
//! every mutation is one atomic multi-field write.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GatewayError;
use crate::messaging::now_nanos;

/// Reserved hash field holding the nanosecond timestamp of the last mutation.
pub const LAST_UPDATED_FIELD: &str = "__last_updated__";

/// Store key for a session hash.
pub fn session_key(session_id: &str) -> String {
    format!("level:sessions:{session_id}")
}

/// MsgPack-encode a session value. Values that cannot be represented in the
/// compact schemaless encoding fail with [`GatewayError::UnserializableValue`].
pub fn serialize<T: Serialize + ?Sized>(
    session_id: &str,
    value: &T,
) -> Result<Vec<u8>, GatewayError> {
    rmp_serde::to_vec(value).map_err(|e| GatewayError::UnserializableValue {
        session_id: session_id.to_owned(),
        reason: e.to_string(),
    })
}

/// Decode a stored session value back into opaque JSON.
pub fn deserialize(bytes: &[u8]) -> Result<serde_json::Value, GatewayError> {
    rmp_serde::from_slice(bytes).map_err(|e| GatewayError::MalformedPayload(e.to_string()))
}

/// In-memory image of one player's stored state.
///
/// Holds no reference back to its store; the store is passed explicitly to
/// every operation that touches it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Timestamp last observed from the store, nanoseconds.
    pub last_updated: i64,
    data: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Empty session image; populated by [`SessionStore::reload`].
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), last_updated: 0, data: HashMap::new() }
    }

    /// Cached value for `key`. Advisory unless validated against the store.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn apply_write(&mut self, key: &str, value: serde_json::Value, timestamp: i64) {
        self.data.insert(key.to_owned(), value);
        self.last_updated = timestamp;
    }
}

/// Build a [`Session`] from a raw stored hash. Fields that fail to decode are
/// skipped, matching the tolerance of the wire contract; an empty hash means
/// the session does not exist.
pub fn session_from_hash(
    session_id: &str,
    hash: HashMap<String, Vec<u8>>,
) -> Result<Session, GatewayError> {
    if hash.is_empty() {
        return Err(GatewayError::SessionNotFound { session_id: session_id.to_owned() });
    }

    let mut session = Session::new(session_id);
    for (field, raw) in hash {
        if field == LAST_UPDATED_FIELD {
            if let Ok(ts) = std::str::from_utf8(&raw) {
                if let Ok(parsed) = ts.parse::<i64>() {
                    session.last_updated = parsed;
                }
            }
            continue;
        }
        match deserialize(&raw) {
            Ok(value) => {
                session.data.insert(field, value);
            }
            Err(_) => continue,
        }
    }
    Ok(session)
}

/// Contract over the external KV store backing session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically write `__last_updated__ = now()` and reset the TTL.
    /// Idempotent: an existing session gets a fresh timestamp and TTL.
    async fn start(&self, session_id: &str) -> Result<(), GatewayError>;

    /// Atomically copy every field of `old` into `new` (existing fields in
    /// `new` win), then delete `old`. Returns the number of fields actually
    /// copied. Fails with `SessionNotFound` when `old` is empty.
    async fn merge(&self, old_session_id: &str, new_session_id: &str)
        -> Result<u64, GatewayError>;

    /// Read the full session, or `SessionNotFound`.
    async fn load(&self, session_id: &str) -> Result<Session, GatewayError>;

    /// Re-read the session in place.
    async fn reload(&self, session: &mut Session) -> Result<(), GatewayError>;

    /// True iff the stored timestamp equals the session's. An absent or
    /// malformed stored timestamp is an error, not `false`.
    async fn validate(&self, session: &Session) -> Result<bool, GatewayError>;

    /// Write `key` and a fresh `__last_updated__` in one atomic multi-field
    /// update, reset the TTL, and reflect both into the in-memory session.
    async fn set_key(
        &self,
        session: &mut Session,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), GatewayError>;
}

const START_SCRIPT: &str = r#"
    local res
    res = redis.call("HSET", KEYS[1], KEYS[2], ARGV[1])
    res = redis.call("EXPIRE", KEYS[1], ARGV[2])
    return res
"#;

// Reads every field of the old hash, errors when empty, copies each field
// into the new hash only where absent, deletes the old hash, and returns the
// number of fields copied. One atomic step on the server.
const MERGE_SCRIPT: &str = r#"
    local values = redis.call("HGETALL", KEYS[1])
    if (#values == 0) then
        return redis.error_reply("Session was not found!")
    end
    redis.call("DEL", KEYS[1])

    local keys = 0
    local res
    for i=1, #values, 2 do
        res = redis.call("HSETNX", KEYS[2], values[i], values[i + 1])
        keys = keys + res
    end

    return keys
"#;

const SET_KEY_SCRIPT: &str = r#"
    local res
    res = redis.call("HSET", KEYS[1], KEYS[2], ARGV[1], KEYS[3], ARGV[2])
    res = redis.call("EXPIRE", KEYS[1], ARGV[3])
    return res
"#;

const MERGE_NOT_FOUND: &str = "Session was not found!";

/// Session store over a Redis connection. Mutations run as server-side Lua
/// scripts so each one is a single atomic step.
pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
    expiration_secs: u64,
    start_script: redis::Script,
    merge_script: redis::Script,
    set_key_script: redis::Script,
}

impl RedisSessionStore {
    /// Connect and ping the store; `expiration_secs` is the session TTL.
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        db: i64,
        expiration_secs: u64,
    ) -> Result<Self, GatewayError> {
        let url = if password.is_empty() {
            format!("redis://{host}:{port}/{db}")
        } else {
            format!("redis://:{password}@{host}:{port}/{db}")
        };

        tracing::info!(host, port, db, "connecting to session store");
        let client = redis::Client::open(url).map_err(GatewayError::transport)?;
        let mut conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(GatewayError::transport)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(GatewayError::transport)?;
        tracing::info!("session store connected");

        Ok(Self {
            conn,
            expiration_secs,
            start_script: redis::Script::new(START_SCRIPT),
            merge_script: redis::Script::new(MERGE_SCRIPT),
            set_key_script: redis::Script::new(SET_KEY_SCRIPT),
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn start(&self, session_id: &str) -> Result<(), GatewayError> {
        let timestamp = now_nanos();
        tracing::debug!(session_id, timestamp, "starting session");

        let mut conn = self.conn.clone();
        let _: i64 = self
            .start_script
            .key(session_key(session_id))
            .key(LAST_UPDATED_FIELD)
            .arg(timestamp.to_string())
            .arg(self.expiration_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(GatewayError::transport)?;

        Ok(())
    }

    async fn merge(
        &self,
        old_session_id: &str,
        new_session_id: &str,
    ) -> Result<u64, GatewayError> {
        let mut conn = self.conn.clone();
        let copied: Result<i64, redis::RedisError> = self
            .merge_script
            .key(session_key(old_session_id))
            .key(session_key(new_session_id))
            .invoke_async(&mut conn)
            .await;

        match copied {
            Ok(n) => Ok(n.max(0) as u64),
            Err(e) if e.to_string().contains(MERGE_NOT_FOUND) => {
                Err(GatewayError::SessionNotFound { session_id: old_session_id.to_owned() })
            }
            Err(e) => Err(GatewayError::transport(e)),
        }
    }

    async fn load(&self, session_id: &str) -> Result<Session, GatewayError> {
        let mut conn = self.conn.clone();
        let hash: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await
            .map_err(GatewayError::transport)?;

        session_from_hash(session_id, hash)
    }

    async fn reload(&self, session: &mut Session) -> Result<(), GatewayError> {
        *session = self.load(&session.id).await?;
        Ok(())
    }

    async fn validate(&self, session: &Session) -> Result<bool, GatewayError> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = redis::cmd("HGET")
            .arg(session_key(&session.id))
            .arg(LAST_UPDATED_FIELD)
            .query_async(&mut conn)
            .await
            .map_err(GatewayError::transport)?;

        let stored = stored.ok_or_else(|| {
            GatewayError::MalformedPayload(format!(
                "session {} has no {LAST_UPDATED_FIELD} timestamp",
                session.id
            ))
        })?;
        let stored: i64 = stored.parse().map_err(|_| {
            GatewayError::MalformedPayload(format!(
                "session {} has a malformed {LAST_UPDATED_FIELD} timestamp",
                session.id
            ))
        })?;

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

        let mut conn = self.conn.clone();
        let _: i64 = self
            .set_key_script
            .key(session_key(&session.id))
            .key(key)
            .key(LAST_UPDATED_FIELD)
            .arg(serialized)
            .arg(timestamp.to_string())
            .arg(self.expiration_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(GatewayError::transport)?;

        session.apply_write(key, value, timestamp);
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
