// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain HTTP endpoints served next to the WebSocket upgrade.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::channel::ChannelState;

/// `GET /healthcheck` — answers the configured working text while the
/// channel is up.
pub async fn healthcheck(State(state): State<Arc<ChannelState>>) -> impl IntoResponse {
    (StatusCode::OK, state.config.channel.working_text.trim().to_owned())
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
