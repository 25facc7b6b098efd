//! Voice gateway wire format (version 4).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sable_core::Snowflake;

use crate::crypto::EncryptionMode;
use crate::error::{VoiceError, VoiceResult};

/// Voice gateway opcodes.
pub mod opcode {
    /// Client identify.
    pub const IDENTIFY: u8 = 0;
    /// Client protocol selection.
    pub const SELECT_PROTOCOL: u8 = 1;
    /// Server ready (SSRC, UDP endpoint, modes).
    pub const READY: u8 = 2;
    /// Client heartbeat.
    pub const HEARTBEAT: u8 = 3;
    /// Server session description (mode, key).
    pub const SESSION_DESCRIPTION: u8 = 4;
    /// Speaking state, both directions.
    pub const SPEAKING: u8 = 5;
    /// Server heartbeat acknowledgement.
    pub const HEARTBEAT_ACK: u8 = 6;
    /// Client resume.
    pub const RESUME: u8 = 7;
    /// Server hello.
    pub const HELLO: u8 = 8;
    /// Server resume acknowledgement.
    pub const RESUMED: u8 = 9;
    /// Another client left the call.
    pub const CLIENT_DISCONNECT: u8 = 13;
}

/// Voice close codes.
pub mod close_code {
    /// Token was not accepted.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// Session is no longer valid.
    pub const SESSION_NO_LONGER_VALID: u16 = 4006;
    /// Session timed out.
    pub const SESSION_TIMEOUT: u16 = 4009;
    /// Kicked, channel deleted or moved.
    pub const DISCONNECTED: u16 = 4014;
    /// Voice server crashed; resume.
    pub const VOICE_SERVER_CRASHED: u16 = 4015;
    /// Selected mode was not recognised.
    pub const UNKNOWN_ENCRYPTION_MODE: u16 = 4016;

    /// Returns `true` if the voice session must end.
    #[must_use]
    pub fn is_fatal(code: u16) -> bool {
        matches!(
            code,
            AUTHENTICATION_FAILED | SESSION_NO_LONGER_VALID | DISCONNECTED | UNKNOWN_ENCRYPTION_MODE
        )
    }
}

/// Speaking flags.
pub mod speaking {
    /// Normal voice audio.
    pub const MICROPHONE: u32 = 1 << 0;
    /// Context audio for video.
    pub const SOUNDSHARE: u32 = 1 << 1;
    /// Priority speaker.
    pub const PRIORITY: u32 = 1 << 2;
}

/// A raw voice gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceFrame {
    /// Opcode.
    pub op: u8,
    /// Payload.
    #[serde(default)]
    pub d: Value,
}

impl VoiceFrame {
    /// Build a frame from a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Json`] if `payload` fails to serialize.
    pub fn new<T: Serialize>(op: u8, payload: &T) -> VoiceResult<Self> {
        Ok(Self {
            op,
            d: serde_json::to_value(payload)?,
        })
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Json`] on serialization failure.
    pub fn encode(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Client payloads ──────────────────────────────────────────

/// `op 0` payload.
#[derive(Debug, Clone, Serialize)]
pub struct Identify<'a> {
    /// Guild id.
    pub server_id: Snowflake,
    /// Our user id.
    pub user_id: Snowflake,
    /// Session id from the voice state update.
    pub session_id: &'a str,
    /// Token from the voice server update.
    pub token: &'a str,
}

/// `op 7` payload.
#[derive(Debug, Clone, Serialize)]
pub struct Resume<'a> {
    /// Guild id.
    pub server_id: Snowflake,
    /// Session id from the voice state update.
    pub session_id: &'a str,
    /// Token from the voice server update.
    pub token: &'a str,
}

/// `op 1` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectProtocol {
    /// Always `"udp"`.
    pub protocol: &'static str,
    /// Discovered address and chosen mode.
    pub data: SelectProtocolData,
}

/// Address block of [`SelectProtocol`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectProtocolData {
    /// External address from IP discovery.
    pub address: String,
    /// External port from IP discovery.
    pub port: u16,
    /// Chosen encryption mode.
    pub mode: EncryptionMode,
}

/// `op 5` client payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Speaking {
    /// Speaking flags, 0 when silent.
    pub speaking: u32,
    /// Delay in milliseconds.
    pub delay: u32,
    /// Our SSRC.
    pub ssrc: u32,
}

// ── Server payloads ──────────────────────────────────────────

/// `op 2` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ready {
    /// Our SSRC.
    pub ssrc: u32,
    /// Voice UDP host.
    pub ip: String,
    /// Voice UDP port.
    pub port: u16,
    /// Encryption modes the server supports.
    pub modes: Vec<String>,
}

/// `op 4` payload.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SessionDescription {
    /// Mode the server accepted.
    pub mode: String,
    /// Key bytes.
    pub secret_key: Vec<u8>,
}

impl std::fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDescription")
            .field("mode", &self.mode)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// `op 5` server payload: another user's speaking state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpeakingUpdate {
    /// Speaker, when the server includes it.
    #[serde(default)]
    pub user_id: Option<Snowflake>,
    /// Speaker's SSRC.
    pub ssrc: u32,
    /// Speaking flags.
    pub speaking: u32,
}

#[derive(Deserialize)]
struct Hello {
    heartbeat_interval: f64,
}

#[derive(Deserialize)]
struct ClientDisconnect {
    user_id: Snowflake,
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceMessage {
    /// `op 8`.
    Hello {
        /// Heartbeat interval.
        heartbeat_interval: std::time::Duration,
    },
    /// `op 2`.
    Ready(Ready),
    /// `op 4`.
    SessionDescription(SessionDescription),
    /// `op 6`, echoing the heartbeat nonce.
    HeartbeatAck(Option<u64>),
    /// `op 9`.
    Resumed,
    /// `op 5`.
    Speaking(SpeakingUpdate),
    /// `op 13`.
    ClientDisconnect {
        /// User who left.
        user_id: Snowflake,
    },
    /// Anything else.
    Unknown {
        /// Opcode.
        op: u8,
        /// Raw payload.
        data: Value,
    },
}

impl VoiceMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Json`] for malformed JSON and
    /// [`VoiceError::Protocol`] for a known opcode with a bad payload.
    pub fn decode(text: &str) -> VoiceResult<Self> {
        let frame: VoiceFrame = serde_json::from_str(text)?;
        let bad = |e: serde_json::Error| VoiceError::Protocol(format!("op {}: {e}", frame.op));

        Ok(match frame.op {
            opcode::HELLO => {
                let hello: Hello = serde_json::from_value(frame.d.clone()).map_err(bad)?;
                if !hello.heartbeat_interval.is_finite() || hello.heartbeat_interval <= 0.0 {
                    return Err(VoiceError::Protocol(format!(
                        "invalid heartbeat interval {}",
                        hello.heartbeat_interval
                    )));
                }
                Self::Hello {
                    heartbeat_interval: std::time::Duration::from_secs_f64(
                        hello.heartbeat_interval / 1000.0,
                    ),
                }
            },
            opcode::READY => Self::Ready(serde_json::from_value(frame.d.clone()).map_err(bad)?),
            opcode::SESSION_DESCRIPTION => {
                Self::SessionDescription(serde_json::from_value(frame.d.clone()).map_err(bad)?)
            },
            opcode::HEARTBEAT_ACK => Self::HeartbeatAck(frame.d.as_u64()),
            opcode::RESUMED => Self::Resumed,
            opcode::SPEAKING => Self::Speaking(serde_json::from_value(frame.d.clone()).map_err(bad)?),
            opcode::CLIENT_DISCONNECT => {
                let gone: ClientDisconnect = serde_json::from_value(frame.d.clone()).map_err(bad)?;
                Self::ClientDisconnect {
                    user_id: gone.user_id,
                }
            },
            op => Self::Unknown { op, data: frame.d },
        })
    }
}

/// Voice `WebSocket` URL for an endpoint from a voice server update.
///
/// Bare hosts get `wss://`; explicit `ws`/`wss` schemes are kept.
///
/// # Errors
///
/// Returns [`VoiceError::InvalidEndpoint`] for other schemes or
/// unparsable hosts.
pub fn connect_url(endpoint: &str) -> VoiceResult<String> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("wss://{endpoint}")
    };
    let mut url = url::Url::parse(&with_scheme)
        .map_err(|e| VoiceError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none() {
        return Err(VoiceError::InvalidEndpoint(endpoint.to_string()));
    }
    url.set_query(Some("v=4"));
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn hello_interval_is_float_millis() {
        let msg = VoiceMessage::decode(r#"{"op":8,"d":{"heartbeat_interval":13750.0}}"#).unwrap();
        assert_eq!(
            msg,
            VoiceMessage::Hello {
                heartbeat_interval: Duration::from_millis(13_750)
            }
        );
        assert!(VoiceMessage::decode(r#"{"op":8,"d":{"heartbeat_interval":0}}"#).is_err());
    }

    #[test]
    fn ready_and_description_decode() {
        let ready = VoiceMessage::decode(
            r#"{"op":2,"d":{"ssrc":1,"ip":"127.0.0.1","port":1234,"modes":["xsalsa20_poly1305"],"heartbeat_interval":1}}"#,
        )
        .unwrap();
        let VoiceMessage::Ready(ready) = ready else {
            panic!("expected ready");
        };
        assert_eq!(ready.ssrc, 1);
        assert_eq!(ready.port, 1234);

        let text = json!({"op": 4, "d": {"mode": "xsalsa20_poly1305", "secret_key": vec![1u8; 32]}})
            .to_string();
        let VoiceMessage::SessionDescription(desc) = VoiceMessage::decode(&text).unwrap() else {
            panic!("expected session description");
        };
        assert_eq!(desc.secret_key.len(), 32);
        assert!(!format!("{desc:?}").contains("1, 1"));
    }

    #[test]
    fn misc_server_ops() {
        assert_eq!(
            VoiceMessage::decode(r#"{"op":6,"d":1501184119561}"#).unwrap(),
            VoiceMessage::HeartbeatAck(Some(1_501_184_119_561))
        );
        assert_eq!(
            VoiceMessage::decode(r#"{"op":9,"d":null}"#).unwrap(),
            VoiceMessage::Resumed
        );
        assert_eq!(
            VoiceMessage::decode(r#"{"op":13,"d":{"user_id":"42"}}"#).unwrap(),
            VoiceMessage::ClientDisconnect {
                user_id: Snowflake::new(42)
            }
        );
        assert!(matches!(
            VoiceMessage::decode(r#"{"op":18,"d":{}}"#).unwrap(),
            VoiceMessage::Unknown { op: 18, .. }
        ));
        assert!(VoiceMessage::decode(r#"{"op":2,"d":{}}"#).is_err());
    }

    #[test]
    fn select_protocol_shape() {
        let frame = VoiceFrame::new(
            opcode::SELECT_PROTOCOL,
            &SelectProtocol {
                protocol: "udp",
                data: SelectProtocolData {
                    address: "203.0.113.1".into(),
                    port: 50000,
                    mode: EncryptionMode::AeadAes256GcmRtpsize,
                },
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"op": 1, "d": {"protocol": "udp", "data": {
                "address": "203.0.113.1", "port": 50000, "mode": "aead_aes256_gcm_rtpsize"
            }}})
        );
    }

    #[test]
    fn endpoint_urls() {
        assert_eq!(
            connect_url("us-east1.example.gg:443").unwrap(),
            "wss://us-east1.example.gg:443/?v=4"
        );
        assert_eq!(connect_url("ws://127.0.0.1:9000").unwrap(), "ws://127.0.0.1:9000/?v=4");
        assert!(connect_url("http://example.gg").is_err());
    }

    #[test]
    fn fatal_close_codes() {
        for code in [4004, 4006, 4014, 4016] {
            assert!(close_code::is_fatal(code));
        }
        for code in [1000, 4000, 4009, 4015] {
            assert!(!close_code::is_fatal(code));
        }
    }
}
