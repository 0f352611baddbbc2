// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types for the dispatch plane.
//!
//! An [`Action`] is an inbound client message addressed by a dot-hierarchical
//! key; an [`Event`] is an outbound server message, either the reply to an
//! action or an unsolicited broadcast. Both travel as JSON. Timestamps are
//! integer nanoseconds since the Unix epoch, matching the session store's
//! `__last_updated__` field.

use serde::{Deserialize, Serialize};

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Inbound client message, addressed by dotted key.
///
/// The first dot-segment of `key` is the *namespace* and routes the action to
/// a service family (e.g. `channel`, `tictactoe`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type", default = "action_type")]
    pub kind: String,
    pub key: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
    #[serde(default = "now_nanos")]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn action_type() -> String {
    "action".to_owned()
}

impl Action {
    /// Build an action stamped with the current time.
    pub fn new(key: impl Into<String>, session_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: action_type(),
            key: key.into(),
            session_id: session_id.into(),
            timestamp: now_nanos(),
            payload,
        }
    }

    /// First dot-segment of the action key.
    pub fn namespace(&self) -> &str {
        self.key.split('.').next().unwrap_or(&self.key)
    }
}

/// Outbound server message. Same wire shape as [`Action`] minus the
/// session and type fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    #[serde(default = "now_nanos")]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { key: key.into(), timestamp: now_nanos(), payload }
    }
}

#[cfg(test)]
#[path = "messaging_tests.rs"]
mod tests;
