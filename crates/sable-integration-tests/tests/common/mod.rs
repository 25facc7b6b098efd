//! Shared test harness for integration tests.

use std::sync::Arc;
use std::time::Duration;

use sable_core::{Snowflake, Token};
use sable_gateway::{GatewayConfig, GatewayHandle, GatewayResult, GatewaySession, IdentifyGate, ShardId};
use sable_http::{DispatcherConfig, HttpTransport, Method, Request, RestDispatcher, Route};
use sable_test::{MockConnection, MockGateway};
use sable_voice::{KeepaliveConfig, VoiceConfig, VoiceConnectInfo};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long any single step may take before a test fails.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

/// Guild used throughout.
#[allow(dead_code)]
pub const GUILD: u64 = 41_771_983_423_143_937;

/// Bot token the mock servers expect.
#[allow(dead_code)]
pub const TOKEN: &str = "integration-token";

/// A dispatcher over `transport` with default limits.
#[allow(dead_code)]
pub fn rest(transport: impl HttpTransport + 'static) -> Arc<RestDispatcher> {
    rest_with(transport, DispatcherConfig::default())
}

/// A dispatcher over `transport` with `config`.
#[allow(dead_code)]
pub fn rest_with(transport: impl HttpTransport + 'static, config: DispatcherConfig) -> Arc<RestDispatcher> {
    Arc::new(RestDispatcher::with_transport(
        Token::bot(TOKEN).unwrap(),
        config,
        Arc::new(transport),
    ))
}

/// `GET /guilds/{guild_id}/roles`.
#[allow(dead_code)]
pub fn guild_roles(guild: u64) -> Request {
    Request::new(Route::new(Method::Get, "/guilds/{guild_id}/roles").param("guild_id", guild))
}

/// Start one shard against `gateway` with fast reconnects.
#[allow(dead_code)]
pub fn spawn_shard(
    gateway: &MockGateway,
) -> (
    GatewayHandle,
    mpsc::UnboundedReceiver<sable_gateway::SessionEvent>,
    JoinHandle<GatewayResult<()>>,
) {
    let config = GatewayConfig {
        url: gateway.url(),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        hello_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        ..GatewayConfig::default()
    };
    GatewaySession::spawn(
        Token::bot(TOKEN).unwrap(),
        ShardId::ONE,
        config,
        IdentifyGate::new(1, Duration::from_millis(10)),
    )
}

/// Next item from an event channel, failing the test after [`WAIT`].
#[allow(dead_code)]
pub async fn next<T>(events: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Serve Hello, expect IDENTIFY, and answer READY at seq 1.
#[allow(dead_code)]
pub async fn identify_and_ready(conn: &mut MockConnection, interval_ms: u64, session_id: &str) {
    conn.hello(interval_ms).await;
    let identify = conn.expect_op(2).await;
    assert_eq!(identify["d"]["token"], TOKEN);
    conn.dispatch(
        1,
        "READY",
        json!({"session_id": session_id, "user": {"id": "42", "username": "sable"}}),
    )
    .await;
}

/// Voice connection details pointing at `gateway`.
#[allow(dead_code)]
pub fn voice_info(gateway: &MockGateway) -> VoiceConnectInfo {
    VoiceConnectInfo {
        guild_id: Snowflake::new(GUILD),
        user_id: Snowflake::new(42),
        session_id: "voice-session".into(),
        endpoint: gateway.url(),
        token: Token::bearer("voice-token").unwrap(),
    }
}

/// Voice settings with short timers.
#[allow(dead_code)]
pub fn voice_config() -> VoiceConfig {
    VoiceConfig {
        keepalive: KeepaliveConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
        },
        discovery_timeout: Duration::from_millis(200),
        discovery_attempts: 3,
        ready_timeout: Duration::from_secs(2),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        ..VoiceConfig::default()
    }
}
