//! Integration tests for the voice handshake and UDP path.

mod common;

use common::{GUILD, next, voice_config, voice_info};
use sable_core::Snowflake;
use sable_test::{MockGateway, MockVoiceUdp};
use sable_voice::{EncryptionMode, VoiceEvent, VoiceSession, VoiceState};
use serde_json::json;

#[tokio::test]
async fn discovered_address_is_selected_verbatim() {
    let mut gateway = MockGateway::start().await;
    let udp = MockVoiceUdp::with_external("198.51.100.23:61234".parse().unwrap()).await;
    let (handle, mut events, _task) = VoiceSession::spawn(voice_info(&gateway), voice_config());

    let mut conn = gateway.accept().await;
    conn.send_json(json!({"op": 8, "d": {"heartbeat_interval": 13_750.0}}))
        .await;
    let identify = conn.expect_op(0).await;
    assert_eq!(identify["d"]["server_id"], GUILD.to_string());
    assert_eq!(identify["d"]["token"], "voice-token");

    conn.send_json(json!({"op": 2, "d": {
        "ssrc": 0x00BE_EF01_u32,
        "ip": "127.0.0.1",
        "port": udp.addr().port(),
        "modes": ["aead_xchacha20_poly1305_rtpsize", "xsalsa20_poly1305"],
    }}))
    .await;

    let select = conn.expect_op(1).await;
    assert_eq!(udp.probes(), vec![0x00BE_EF01]);
    assert_eq!(select["d"]["protocol"], "udp");
    assert_eq!(select["d"]["data"]["address"], "198.51.100.23");
    assert_eq!(select["d"]["data"]["port"], 61234);
    assert_eq!(select["d"]["data"]["mode"], "aead_xchacha20_poly1305_rtpsize");

    conn.send_json(json!({"op": 4, "d": {
        "mode": "aead_xchacha20_poly1305_rtpsize",
        "secret_key": vec![3u8; 32],
    }}))
    .await;

    assert_eq!(next(&mut events).await, VoiceEvent::Connected { ssrc: 0x00BE_EF01 });
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, VoiceState::Connected);
    assert_eq!(snapshot.mode, Some(EncryptionMode::AeadXchacha20Poly1305Rtpsize));
    assert!(udp.keepalives() >= 1);
    handle.close();
}

#[tokio::test]
async fn other_users_leaving_is_reported() {
    let mut gateway = MockGateway::start().await;
    let udp = MockVoiceUdp::start().await;
    let (handle, mut events, _task) = VoiceSession::spawn(voice_info(&gateway), voice_config());

    let mut conn = gateway.accept().await;
    conn.send_json(json!({"op": 8, "d": {"heartbeat_interval": 13_750.0}}))
        .await;
    conn.expect_op(0).await;
    conn.send_json(json!({"op": 2, "d": {
        "ssrc": 5, "ip": "127.0.0.1", "port": udp.addr().port(), "modes": ["xsalsa20_poly1305"],
    }}))
    .await;
    conn.expect_op(1).await;
    conn.send_json(json!({"op": 4, "d": {"mode": "xsalsa20_poly1305", "secret_key": vec![1u8; 32]}}))
        .await;
    assert_eq!(next(&mut events).await, VoiceEvent::Connected { ssrc: 5 });

    conn.send_json(json!({"op": 13, "d": {"user_id": "77"}})).await;
    assert_eq!(
        next(&mut events).await,
        VoiceEvent::ClientDisconnect {
            user_id: Snowflake::new(77)
        }
    );
    handle.close();
}
