// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gameplay service: one bot game per player session.
//!
//! Actions under `tictactoe.gameplay` and the events they produce:
//! - `start` `{seed?}` → `tictactoe.gameplay.started` `{gameID}`
//! - `move` `{posX, posY}` → `tictactoe.gameplay.status` `{board}` while the
//!   game runs, `tictactoe.gameplay.result` `{winner, board}` once decided
//!   (winner 0 is a draw), or `tictactoe.gameplay.error` for illegal input.
//!
//! Finished games leave the active-game map immediately.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use rally::messaging::{now_nanos, Action, Event};
use rally::registry::{Service, ServiceDescriptor};

use crate::rules::{Board, BotRng};

struct Game {
    game_id: String,
    board: Board,
    rng: BotRng,
}

/// Tic-tac-toe against the house bot, keyed by player session.
pub struct GameplayService {
    details: ServiceDescriptor,
    games: Mutex<HashMap<String, Game>>,
}

impl Default for GameplayService {
    fn default() -> Self {
        Self::new()
    }
}

impl GameplayService {
    pub fn new() -> Self {
        Self {
            details: ServiceDescriptor::new(
                "tictactoe.gameplay",
                "tictactoe",
                "Play tic-tac-toe with friends.",
                env!("CARGO_PKG_VERSION"),
                false,
            ),
            games: Mutex::new(HashMap::new()),
        }
    }

    /// Number of games currently in play.
    pub async fn active_games(&self) -> usize {
        self.games.lock().await.len()
    }

    async fn start(&self, action: &Action) -> anyhow::Result<Option<Event>> {
        let seed = action
            .payload
            .get("seed")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| now_nanos() as u64);

        let game = Game {
            game_id: Uuid::new_v4().to_string(),
            board: Board::new(),
            rng: BotRng::new(seed),
        };
        let game_id = game.game_id.clone();

        // A fresh start replaces whatever game the session had going.
        self.games.lock().await.insert(action.session_id.clone(), game);

        Ok(Some(Event::new("tictactoe.gameplay.started", json!({"gameID": game_id}))))
    }

    async fn play(&self, action: &Action) -> anyhow::Result<Option<Event>> {
        let (x, y) = match (
            action.payload.get("posX").and_then(|v| v.as_u64()),
            action.payload.get("posY").and_then(|v| v.as_u64()),
        ) {
            (Some(x), Some(y)) => (x as usize, y as usize),
            _ => {
                return Ok(Some(Event::new(
                    "tictactoe.gameplay.error",
                    json!({"reason": "payload must carry posX and posY"}),
                )))
            }
        };

        let mut games = self.games.lock().await;
        let Some(game) = games.get_mut(&action.session_id) else {
            return Ok(Some(Event::new(
                "tictactoe.gameplay.error",
                json!({"reason": "no active game for this session"}),
            )));
        };

        if let Err(rejection) = game.board.validate_move(1, x, y) {
            return Ok(Some(Event::new(
                "tictactoe.gameplay.error",
                json!({"reason": rejection.to_string()}),
            )));
        }
        game.board.tick_as(1, x, y);

        if !game.board.is_game_over() {
            game.board.bot_move(&mut game.rng);
        }

        let board = game.board.pieces();
        if game.board.is_game_over() {
            let winner = game.board.winner();
            let game_id = game.game_id.clone();
            games.remove(&action.session_id);
            tracing::debug!(game_id, winner, "game finished");
            return Ok(Some(Event::new(
                "tictactoe.gameplay.result",
                json!({"winner": winner, "board": board}),
            )));
        }

        Ok(Some(Event::new(
            "tictactoe.gameplay.status",
            json!({"board": board, "currentPlayer": game.board.current_player}),
        )))
    }
}

#[async_trait]
impl Service for GameplayService {
    fn details(&self) -> ServiceDescriptor {
        self.details.clone()
    }

    async fn handle(&self, _subject: &str, action: &Action) -> anyhow::Result<Option<Event>> {
        match action.key.as_str() {
            "tictactoe.gameplay.start" => self.start(action).await,
            "tictactoe.gameplay.move" => self.play(action).await,
            other => anyhow::bail!("cannot process action identified by {other}"),
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
