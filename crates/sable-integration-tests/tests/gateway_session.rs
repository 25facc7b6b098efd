//! Integration tests for a gateway session against a loopback gateway.

mod common;

use std::time::Duration;

use common::{identify_and_ready, next, spawn_shard};
use sable_core::Snowflake;
use sable_gateway::{DispatchEvent, SessionEvent, SessionState};
use sable_test::MockGateway;
use serde_json::json;
use tokio::time::Instant;

#[tokio::test]
async fn unacked_heartbeats_reconnect_within_two_intervals() {
    const INTERVAL: Duration = Duration::from_millis(41_250);

    let mut gateway = MockGateway::start().await;
    let (handle, mut events, _task) = spawn_shard(&gateway);

    let mut conn = gateway.accept().await;
    identify_and_ready(&mut conn, 41_250, "abc").await;
    assert_eq!(
        next(&mut events).await,
        SessionEvent::Connected {
            session_id: "abc".into(),
            user_id: Snowflake::new(42),
        }
    );
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.sequence, Some(1));
    assert_eq!(snapshot.heartbeat_interval, Some(INTERVAL));

    // The server never acks; let virtual time run the heartbeat schedule.
    tokio::time::pause();
    let start = Instant::now();
    let disconnected = loop {
        match events.recv().await {
            Some(SessionEvent::Disconnected { code, fatal }) => break (code, fatal),
            Some(_) => {},
            None => panic!("session ended"),
        }
    };
    let elapsed = start.elapsed();

    assert_eq!(disconnected, (None, false));
    assert!(elapsed >= INTERVAL, "zombied after {elapsed:?}");
    assert!(elapsed <= INTERVAL * 2 + Duration::from_millis(100), "zombied after {elapsed:?}");
    assert_ne!(handle.snapshot().state, SessionState::Connected);

    let beat = conn.recv_json().await.unwrap();
    assert_eq!(beat["op"], 1);
    assert_eq!(beat["d"], 1);
    handle.close();
}

#[tokio::test]
async fn resume_keeps_sequence_monotonic() {
    let mut gateway = MockGateway::start().await;
    let (handle, mut events, _task) = spawn_shard(&gateway);

    let mut conn = gateway.accept().await;
    identify_and_ready(&mut conn, 45_000, "abc").await;
    for seq in 2..=3 {
        conn.dispatch(seq, "MESSAGE_CREATE", json!({"id": seq.to_string()}))
            .await;
    }

    let mut seen = Vec::new();
    while seen.len() < 3 {
        if let SessionEvent::Dispatch { seq: Some(seq), .. } = next(&mut events).await {
            seen.push(seq);
        }
    }

    conn.close(4000).await;
    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    let resume = conn.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 3);

    // Replayed events are dropped; new ones continue the sequence.
    for seq in 2..=5 {
        conn.dispatch(seq, "MESSAGE_CREATE", json!({"id": seq.to_string()}))
            .await;
    }
    conn.dispatch(6, "RESUMED", json!(null)).await;

    let mut resumed = false;
    while !resumed {
        match next(&mut events).await {
            SessionEvent::Dispatch { seq: Some(seq), event } => {
                if !matches!(event, DispatchEvent::Resumed) {
                    seen.push(seq);
                }
            },
            SessionEvent::Resumed => resumed = true,
            SessionEvent::Disconnected { fatal, .. } => assert!(!fatal),
            other => panic!("unexpected {other:?}"),
        }
    }

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    handle.wait_for_state(SessionState::Connected).await.unwrap();
    assert_eq!(handle.snapshot().sequence, Some(6));
    handle.close();
}
