//! Integration tests for the connection supervisor across shards.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{TOKEN, WAIT};
use sable_client::{ConnectionSupervisor, EventHandler, LifecycleEvent};
use sable_config::ClientConfig;
use sable_core::{Snowflake, Token};
use sable_gateway::{DispatchEvent, ShardId};
use sable_test::{MockConnection, MockGateway};
use serde_json::json;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn for_shard(&self, shard: u32) -> Vec<String> {
        let prefix = format!("{shard}:");
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.strip_prefix(&prefix).map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn dispatch(&self, shard: ShardId, event: &DispatchEvent) {
        let label = match event {
            DispatchEvent::Other { name, data } => format!("{}:{name}#{}", shard.id, data["n"]),
            other => format!("{}:{}", shard.id, other.name()),
        };
        self.seen.lock().unwrap().push(label);
    }

    async fn lifecycle(&self, event: &LifecycleEvent) {
        let label = match event {
            LifecycleEvent::Connected { shard, .. } => format!("{}:connected", shard.id),
            LifecycleEvent::Resumed { shard } => format!("{}:resumed", shard.id),
            LifecycleEvent::Disconnected { shard, code, .. } => {
                format!("{}:disconnected:{}", shard.id, code.unwrap_or_default())
            },
            _ => return,
        };
        self.seen.lock().unwrap().push(label);
    }
}

fn config(gateway: &MockGateway) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.gateway.url = Some(gateway.url());
    config.gateway.shard_count = Some(2);
    config.gateway.identify_interval_ms = 10;
    config.gateway.backoff_base_ms = 10;
    config.gateway.backoff_max_ms = 50;
    config
}

/// Answer a fresh connection; returns the shard id it identified as.
async fn ready(conn: &mut MockConnection) -> u64 {
    conn.hello(45_000).await;
    let identify = conn.expect_op(2).await;
    let shard = identify["d"]["shard"][0].as_u64().unwrap();
    conn.dispatch(
        1,
        "READY",
        json!({"session_id": format!("session-{shard}"), "user": {"id": "42", "username": "sable"}}),
    )
    .await;
    shard
}

#[tokio::test]
async fn shards_deliver_in_order_across_a_resume() {
    let mut gateway = MockGateway::start().await;
    let recorder = Arc::new(Recorder::default());
    let supervisor = ConnectionSupervisor::builder(config(&gateway))
        .token(Token::bot(TOKEN).unwrap())
        .shared_handler(Arc::clone(&recorder) as Arc<dyn EventHandler>)
        .start()
        .await
        .unwrap();
    let mut lifecycle = supervisor.subscribe();

    let mut conns = [gateway.accept().await, gateway.accept().await];
    let mut ids = [0; 2];
    for (conn, id) in conns.iter_mut().zip(ids.iter_mut()) {
        *id = ready(conn).await;
    }
    tokio::time::timeout(WAIT, supervisor.wait_until_connected())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(supervisor.user_id(), Some(Snowflake::new(42)));
    let [first, second] = conns;
    let (mut zero, mut one) = if ids[0] == 0 { (first, second) } else { (second, first) };

    for n in 2..=4 {
        zero.dispatch(n, "MESSAGE_CREATE", json!({"n": n})).await;
        one.dispatch(n, "TYPING_START", json!({"n": n})).await;
    }

    // Shard 1 drops and resumes while shard 0 keeps going.
    one.close(4000).await;
    let mut one = gateway.accept().await;
    one.hello(45_000).await;
    let resume = one.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "session-1");
    assert_eq!(resume["d"]["seq"], 4);
    one.dispatch(5, "TYPING_START", json!({"n": 5})).await;
    one.dispatch(6, "RESUMED", json!(null)).await;
    zero.dispatch(5, "MESSAGE_CREATE", json!({"n": 5})).await;

    let mut saw = Vec::new();
    while !saw.contains(&LifecycleEvent::Resumed { shard: ShardId::new(1, 2) }) {
        saw.push(
            tokio::time::timeout(WAIT, lifecycle.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert!(saw.contains(&LifecycleEvent::Disconnected {
        shard: ShardId::new(1, 2),
        code: Some(4000),
        fatal: false,
    }));

    // Shard 0's last frame travels on its own socket.
    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.shutdown().await;

    assert_eq!(
        recorder.for_shard(0),
        [
            "connected",
            "READY",
            "MESSAGE_CREATE#2",
            "MESSAGE_CREATE#3",
            "MESSAGE_CREATE#4",
            "MESSAGE_CREATE#5",
        ]
    );
    assert_eq!(
        recorder.for_shard(1),
        [
            "connected",
            "READY",
            "TYPING_START#2",
            "TYPING_START#3",
            "TYPING_START#4",
            "disconnected:4000",
            "TYPING_START#5",
            "resumed",
            "RESUMED",
        ]
    );
}

#[tokio::test]
async fn shutdown_closes_every_shard() {
    let mut gateway = MockGateway::start().await;
    let supervisor = ConnectionSupervisor::builder(config(&gateway))
        .token(Token::bot(TOKEN).unwrap())
        .start()
        .await
        .unwrap();

    let mut conns = [gateway.accept().await, gateway.accept().await];
    for conn in &mut conns {
        ready(conn).await;
    }
    tokio::time::timeout(WAIT, supervisor.wait_until_connected())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        supervisor.shard_for(Snowflake::new(common::GUILD)).id,
        u32::try_from((common::GUILD >> 22) % 2).unwrap()
    );

    tokio::time::timeout(WAIT, supervisor.shutdown()).await.unwrap();
    for conn in &mut conns {
        assert_eq!(conn.closed().await, Some(1000));
    }
}
