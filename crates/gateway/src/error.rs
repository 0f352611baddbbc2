// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the bus, the session store, and the channel.
//!
//! Policies per kind:
//! - `SessionNotFound` is surfaced to the caller; on a rejoin it becomes a
//!   failure event to the client.
//! - `UnserializableValue` is surfaced and never retried.
//! - `Timeout`/`NoSubscribers` are logged and the reply is dropped; actions
//!   may carry side effects, so the core never retries them.
//! - `Transport` is unrecoverable for the affected connection.
//! - `MalformedPayload` is logged and dropped without disconnecting.

use thiserror::Error;

/// Errors raised on the action/event dispatch plane.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The session hash does not exist (or is empty) in the store.
    #[error("session {session_id} was not found in session storage")]
    SessionNotFound { session_id: String },

    /// A value handed to the session store could not be encoded.
    #[error("could not serialize value for session {session_id}: {reason}")]
    UnserializableValue { session_id: String, reason: String },

    /// No reply arrived within the configured window.
    #[error("request on {subject} timed out")]
    Timeout { subject: String },

    /// Nothing is subscribed to the requested subject.
    #[error("no subscribers on {subject}")]
    NoSubscribers { subject: String },

    /// Socket, bus, or store transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// An action or event that could not be deserialized.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl GatewayError {
    /// Transport error from any underlying client error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// True for the two request outcomes that drop the reply silently.
    pub fn drops_reply(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoSubscribers { .. })
    }
}
