// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use rally::bus::Bus;
use rally::messaging::{Action, Event};
use rally::registry::{Service, ServiceRegistry};
use rally::test_support::MemoryBus;

use super::GameplayService;

const TIMEOUT: Duration = Duration::from_millis(500);

async fn request_event(bus: &MemoryBus, action: &Action) -> anyhow::Result<Event> {
    let payload = serde_json::to_vec(action)?;
    let reply = bus.request(&action.key, payload.into(), TIMEOUT).await?;
    Ok(serde_json::from_slice(&reply)?)
}

fn move_action(session: &str, x: u64, y: u64) -> Action {
    Action::new("tictactoe.gameplay.move", session, json!({"posX": x, "posY": y}))
}

#[tokio::test]
async fn seeded_game_plays_out_to_a_player_win() -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    let registry = ServiceRegistry::new(Arc::new(bus.clone()));
    let service = Arc::new(GameplayService::new());
    registry.register(service.clone()).await?;

    let started = request_event(
        &bus,
        &Action::new("tictactoe.gameplay.start", "s-1", json!({"seed": 12345678u64})),
    )
    .await?;
    assert_eq!(started.key, "tictactoe.gameplay.started");
    assert!(started.payload["gameID"].as_str().is_some_and(|id| !id.is_empty()));

    let first = request_event(&bus, &move_action("s-1", 0, 0)).await?;
    assert_eq!(first.key, "tictactoe.gameplay.status");

    let second = request_event(&bus, &move_action("s-1", 0, 1)).await?;
    assert_eq!(second.key, "tictactoe.gameplay.status");

    let third = request_event(&bus, &move_action("s-1", 0, 2)).await?;
    assert_eq!(third.key, "tictactoe.gameplay.result");
    assert_eq!(third.payload["winner"], 1);

    assert_eq!(service.active_games().await, 0, "finished games leave the map");
    Ok(())
}

#[tokio::test]
async fn status_reports_both_sides_of_the_board() -> anyhow::Result<()> {
    let service = GameplayService::new();

    let start = Action::new("tictactoe.gameplay.start", "s-1", json!({"seed": 12345678u64}));
    service.handle(&start.key.clone(), &start).await?;

    let action = move_action("s-1", 0, 0);
    let status = service
        .handle(&action.key.clone(), &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("move must produce a reply"))?;

    let board = &status.payload["board"];
    let flat: Vec<i64> = board
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| row.as_array())
        .flatten()
        .filter_map(|cell| cell.as_i64())
        .collect();
    assert_eq!(flat.len(), 9);
    assert_eq!(flat.iter().filter(|&&c| c == 1).count(), 1, "one player piece");
    assert_eq!(flat.iter().filter(|&&c| c == 2).count(), 1, "one bot piece");
    assert_eq!(status.payload["currentPlayer"], 1);
    Ok(())
}

#[tokio::test]
async fn moving_without_a_game_is_an_error_event() -> anyhow::Result<()> {
    let service = GameplayService::new();
    let action = move_action("s-ghost", 0, 0);

    let event = service
        .handle(&action.key.clone(), &action)
        .await?
        .ok_or_else(|| anyhow::anyhow!("move must produce a reply"))?;
    assert_eq!(event.key, "tictactoe.gameplay.error");
    Ok(())
}

#[tokio::test]
async fn illegal_moves_are_error_events() -> anyhow::Result<()> {
    let service = GameplayService::new();
    let start = Action::new("tictactoe.gameplay.start", "s-1", json!({"seed": 12345678u64}));
    service.handle(&start.key.clone(), &start).await?;

    // First occupy (0,0)...
    let action = move_action("s-1", 0, 0);
    service.handle(&action.key.clone(), &action).await?;

    // ...then replay it and walk off the board.
    for bad in [move_action("s-1", 0, 0), move_action("s-1", 7, 0)] {
        let event = service
            .handle(&bad.key.clone(), &bad)
            .await?
            .ok_or_else(|| anyhow::anyhow!("illegal move must produce a reply"))?;
        assert_eq!(event.key, "tictactoe.gameplay.error");
    }

    let missing = Action::new("tictactoe.gameplay.move", "s-1", json!({"posX": 1}));
    let event = service
        .handle(&missing.key.clone(), &missing)
        .await?
        .ok_or_else(|| anyhow::anyhow!("malformed move must produce a reply"))?;
    assert_eq!(event.key, "tictactoe.gameplay.error");
    Ok(())
}

#[tokio::test]
async fn restarting_replaces_the_running_game() -> anyhow::Result<()> {
    let service = GameplayService::new();

    for _ in 0..2 {
        let start = Action::new("tictactoe.gameplay.start", "s-1", json!({}));
        service.handle(&start.key.clone(), &start).await?;
    }
    assert_eq!(service.active_games().await, 1);
    Ok(())
}

#[tokio::test]
async fn unknown_keys_are_handler_errors() {
    let service = GameplayService::new();
    let action = Action::new("tictactoe.gameplay.taunt", "s-1", json!({}));
    assert!(service.handle("tictactoe.gameplay.taunt", &action).await.is_err());
}
