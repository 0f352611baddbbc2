// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use bytes::Bytes;
use futures_util::{FutureExt, StreamExt};

use super::{subject_matches, Bus};
use crate::error::GatewayError;
use crate::test_support::MemoryBus;

#[yare::parameterized(
    exact = { "a.b.c", "a.b.c", true },
    exact_mismatch = { "a.b.c", "a.b.d", false },
    shorter_subject = { "a.b.c", "a.b", false },
    longer_subject = { "a.b", "a.b.c", false },
    star_mid = { "a.*.c", "a.b.c", true },
    star_one_segment_only = { "a.*", "a.b.c", false },
    tail_matches_one = { "tictactoe.>", "tictactoe.gameplay", true },
    tail_matches_many = { "tictactoe.>", "tictactoe.gameplay.move", true },
    tail_needs_one = { "tictactoe.>", "tictactoe", false },
    sticky_subject = { "tictactoe.7af1", "tictactoe.7af1", true },
    sticky_other_instance = { "tictactoe.7af1", "tictactoe.9bc2", false },
)]
fn subject_patterns(pattern: &str, subject: &str, expected: bool) {
    assert_eq!(subject_matches(pattern, subject), expected);
}

#[tokio::test]
async fn publish_reaches_every_plain_subscriber() -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    let mut first = bus.subscribe("level.events").await?;
    let mut second = bus.subscribe("level.events").await?;

    bus.publish("level.events", Bytes::from_static(b"hello")).await?;

    let a = first.next().await.ok_or_else(|| anyhow::anyhow!("first missed message"))?;
    let b = second.next().await.ok_or_else(|| anyhow::anyhow!("second missed message"))?;
    assert_eq!(a.payload, Bytes::from_static(b"hello"));
    assert_eq!(b.payload, Bytes::from_static(b"hello"));
    Ok(())
}

#[tokio::test]
async fn queue_group_delivers_each_message_exactly_once() -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    let mut first = bus.queue_subscribe("ns.>", "default").await?;
    let mut second = bus.queue_subscribe("ns.>", "default").await?;

    for i in 0..10 {
        bus.publish("ns.action", Bytes::from(format!("m{i}"))).await?;
    }

    fn drain(stream: &mut crate::bus::MessageStream) -> usize {
        let mut count = 0;
        while let Some(Some(_)) = stream.next().now_or_never() {
            count += 1;
        }
        count
    }
    let a = drain(&mut first);
    let b = drain(&mut second);

    assert_eq!(a + b, 10, "each message delivered to exactly one member");
    assert!(a >= 1 && b >= 1, "fair bus reaches both members (got {a}/{b})");
    Ok(())
}

#[tokio::test]
async fn request_reply_round_trips() -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    let mut sub = bus.queue_subscribe("echo.>", "default").await?;

    let responder = bus.clone();
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            if let Some(reply) = msg.reply {
                let _ = responder.publish(&reply, msg.payload).await;
            }
        }
    });

    let reply = bus
        .request("echo.ping", Bytes::from_static(b"payload"), Duration::from_secs(1))
        .await?;
    assert_eq!(reply, Bytes::from_static(b"payload"));
    Ok(())
}

#[tokio::test]
async fn request_without_subscribers_fails_fast() {
    let bus = MemoryBus::new();
    let err = bus
        .request("nobody.ping", Bytes::new(), Duration::from_secs(1))
        .await
        .expect_err("no subscribers bound");
    assert!(matches!(err, GatewayError::NoSubscribers { .. }), "got {err:?}");
}

#[tokio::test]
async fn request_times_out_when_handler_stays_silent() -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    // Subscriber exists but never replies; keep the stream alive, unread.
    let _sub = bus.queue_subscribe("mute.>", "default").await?;

    let err = bus
        .request("mute.ping", Bytes::new(), Duration::from_millis(50))
        .await
        .expect_err("handler never replies");
    assert!(matches!(err, GatewayError::Timeout { .. }), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn delivery_is_fifo_per_subscriber() -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    let mut sub = bus.subscribe("ordered.stream").await?;

    for i in 0..20 {
        bus.publish("ordered.stream", Bytes::from(format!("{i}"))).await?;
    }

    for i in 0..20 {
        let msg = sub.next().await.ok_or_else(|| anyhow::anyhow!("stream ended early"))?;
        assert_eq!(msg.payload, Bytes::from(format!("{i}")));
    }
    Ok(())
}

#[tokio::test]
async fn closed_bus_rejects_traffic() {
    let bus = MemoryBus::new();
    bus.close().await.ok();
    let err = bus.publish("any.subject", Bytes::new()).await.expect_err("bus closed");
    assert!(matches!(err, GatewayError::Transport(_)));
    // Close is idempotent.
    assert!(bus.close().await.is_ok());
}
