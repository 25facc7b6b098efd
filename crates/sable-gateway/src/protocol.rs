//! Gateway wire format: frames, opcodes, typed events and command builders.
//!
//! Every message is a JSON object `{op, d, s?, t?}`. Inbound frames decode
//! into [`GatewayEvent`]; dispatch payloads the transport layer acts on
//! (READY, RESUMED and the two voice updates) are typed, everything else is
//! carried through as raw JSON in [`DispatchEvent::Other`].

use std::time::Duration;

use sable_core::{Snowflake, Token};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::state::ShardId;

// ── Opcodes ──────────────────────────────────────────────────

/// Gateway opcodes.
pub mod opcode {
    /// Event dispatch (receive).
    pub const DISPATCH: u8 = 0;
    /// Heartbeat (both directions).
    pub const HEARTBEAT: u8 = 1;
    /// Identify (send).
    pub const IDENTIFY: u8 = 2;
    /// Presence update (send).
    pub const PRESENCE_UPDATE: u8 = 3;
    /// Voice state update (send).
    pub const VOICE_STATE_UPDATE: u8 = 4;
    /// Resume (send).
    pub const RESUME: u8 = 6;
    /// Server requests a reconnect (receive).
    pub const RECONNECT: u8 = 7;
    /// Request guild members (send).
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    /// Invalid session (receive).
    pub const INVALID_SESSION: u8 = 9;
    /// Hello, carries the heartbeat interval (receive).
    pub const HELLO: u8 = 10;
    /// Heartbeat acknowledgement (receive).
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Default intents: `GUILDS | GUILD_VOICE_STATES | GUILD_MESSAGES`.
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 7) | (1 << 9);

// ── Frames ───────────────────────────────────────────────────

/// A raw gateway message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Opcode.
    pub op: u8,
    /// Opcode-specific data.
    #[serde(default)]
    pub d: Value,
    /// Sequence number (dispatch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name (dispatch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    /// An outbound frame.
    #[must_use]
    pub fn new(op: u8, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// An outbound frame with a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Json`] if `payload` cannot be serialized.
    pub fn command<T: Serialize>(op: u8, payload: &T) -> GatewayResult<Self> {
        Ok(Self::new(op, serde_json::to_value(payload)?))
    }

    /// Parse a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Json`] if `text` is not a frame.
    pub fn decode(text: &str) -> GatewayResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Json`] on serialization failure.
    pub fn encode(&self) -> GatewayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound events ───────────────────────────────────────────

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// `op 0`.
    Dispatch {
        /// Sequence number.
        seq: Option<u64>,
        /// Event payload.
        event: DispatchEvent,
    },
    /// `op 1`: the server wants a heartbeat now.
    Heartbeat,
    /// `op 7`.
    Reconnect,
    /// `op 9`.
    InvalidSession {
        /// Whether the session may be resumed.
        resumable: bool,
    },
    /// `op 10`.
    Hello {
        /// Heartbeat interval.
        heartbeat_interval: Duration,
    },
    /// `op 11`.
    HeartbeatAck,
    /// Any other opcode.
    Unknown {
        /// Opcode.
        op: u8,
        /// Raw data.
        data: Value,
    },
}

impl GatewayEvent {
    /// Decode JSON text into an event.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Json`] if the text is not a frame, or
    /// [`GatewayError::Protocol`] if a known payload is malformed.
    pub fn decode(text: &str) -> GatewayResult<Self> {
        Self::from_frame(Frame::decode(text)?)
    }

    /// Interpret a parsed frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] if a known payload is malformed.
    pub fn from_frame(frame: Frame) -> GatewayResult<Self> {
        Ok(match frame.op {
            opcode::DISPATCH => {
                let name = frame
                    .t
                    .ok_or_else(|| GatewayError::Protocol("dispatch without event name".into()))?;
                Self::Dispatch {
                    seq: frame.s,
                    event: DispatchEvent::decode(name, frame.d)?,
                }
            },
            opcode::HEARTBEAT => Self::Heartbeat,
            opcode::RECONNECT => Self::Reconnect,
            opcode::INVALID_SESSION => Self::InvalidSession {
                resumable: frame.d.as_bool().unwrap_or(false),
            },
            opcode::HELLO => {
                let hello: Hello = serde_json::from_value(frame.d)
                    .map_err(|e| GatewayError::Protocol(format!("bad hello: {e}")))?;
                if hello.heartbeat_interval == 0 {
                    return Err(GatewayError::Protocol("zero heartbeat interval".into()));
                }
                Self::Hello {
                    heartbeat_interval: Duration::from_millis(hello.heartbeat_interval),
                }
            },
            opcode::HEARTBEAT_ACK => Self::HeartbeatAck,
            op => Self::Unknown { op, data: frame.d },
        })
    }
}

#[derive(Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

/// A dispatch (`op 0`) payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// `READY`.
    Ready(Box<Ready>),
    /// `RESUMED`.
    Resumed,
    /// `VOICE_STATE_UPDATE`.
    VoiceStateUpdate(VoiceState),
    /// `VOICE_SERVER_UPDATE`.
    VoiceServerUpdate(VoiceServerUpdate),
    /// Any other event, passed through untouched.
    Other {
        /// Event name.
        name: String,
        /// Raw payload.
        data: Value,
    },
}

impl DispatchEvent {
    /// Decode a payload by event name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] if a typed event's payload does
    /// not match its schema.
    pub fn decode(name: String, data: Value) -> GatewayResult<Self> {
        fn typed<T: serde::de::DeserializeOwned>(name: &str, data: Value) -> GatewayResult<T> {
            serde_json::from_value(data)
                .map_err(|e| GatewayError::Protocol(format!("bad {name} payload: {e}")))
        }

        Ok(match name.as_str() {
            "READY" => Self::Ready(Box::new(typed(&name, data)?)),
            "RESUMED" => Self::Resumed,
            "VOICE_STATE_UPDATE" => Self::VoiceStateUpdate(typed(&name, data)?),
            "VOICE_SERVER_UPDATE" => Self::VoiceServerUpdate(typed(&name, data)?),
            _ => Self::Other { name, data },
        })
    }

    /// Event name as sent on the wire.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ready(_) => "READY",
            Self::Resumed => "RESUMED",
            Self::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            Self::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
            Self::Other { name, .. } => name,
        }
    }
}

/// `READY` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ready {
    /// Session id used for resuming.
    pub session_id: String,
    /// URL to reconnect to when resuming.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// The connected user.
    pub user: ReadyUser,
    /// `[shard_id, shard_count]` echoed back by the server.
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// User object in `READY`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadyUser {
    /// User id.
    pub id: Snowflake,
    /// Username.
    #[serde(default)]
    pub username: String,
}

/// `VOICE_STATE_UPDATE` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceState {
    /// Guild, absent for private calls.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Channel, `None` after leaving.
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    /// User whose state changed.
    pub user_id: Snowflake,
    /// Voice session id.
    pub session_id: String,
}

/// `VOICE_SERVER_UPDATE` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceServerUpdate {
    /// Voice connection token.
    pub token: String,
    /// Guild the server belongs to.
    pub guild_id: Snowflake,
    /// Voice server host, `None` while the server is being reallocated.
    #[serde(default)]
    pub endpoint: Option<String>,
}

// ── Outbound commands ────────────────────────────────────────

/// Client properties sent with identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub browser: String,
    /// Library name.
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "sable".to_string(),
            device: "sable".to_string(),
        }
    }
}

/// Online status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Do not disturb.
    Dnd,
    /// Away.
    Idle,
    /// Shown as offline.
    Invisible,
    /// Offline.
    Offline,
}

/// An activity shown in presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,
    /// Activity type (0 playing, 2 listening, 3 watching, 5 competing).
    #[serde(rename = "type")]
    pub kind: u8,
}

/// Presence payload for identify and `op 3`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Unix milliseconds since idle.
    pub since: Option<u64>,
    /// Activities.
    pub activities: Vec<Activity>,
    /// Status.
    pub status: Status,
    /// Whether the client is AFK.
    pub afk: bool,
}

/// `op 4` payload. A `None` channel leaves voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateVoiceState {
    /// Guild.
    pub guild_id: Snowflake,
    /// Channel to join, or `None` to leave.
    pub channel_id: Option<Snowflake>,
    /// Self-muted.
    pub self_mute: bool,
    /// Self-deafened.
    pub self_deaf: bool,
}

/// `op 8` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestGuildMembers {
    /// Guild.
    pub guild_id: Snowflake,
    /// Username prefix, empty for all members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Maximum members to return (0 = no limit).
    pub limit: u32,
    /// Include presences.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub presences: bool,
    /// Specific users to fetch.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<Snowflake>,
    /// Echoed back in the chunk events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Identify parameters other than the token and shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyOptions {
    /// Intent bitmask.
    pub intents: u64,
    /// Member count above which offline members are omitted (50-250).
    pub large_threshold: u8,
    /// Client properties.
    pub properties: ConnectionProperties,
    /// Initial presence.
    pub presence: Option<PresenceUpdate>,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            intents: DEFAULT_INTENTS,
            large_threshold: 50,
            properties: ConnectionProperties::default(),
            presence: None,
        }
    }
}

#[derive(Serialize)]
struct Identify<'a> {
    token: &'a str,
    intents: u64,
    shard: [u32; 2],
    properties: &'a ConnectionProperties,
    large_threshold: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence: Option<&'a PresenceUpdate>,
}

/// Build an identify frame (`op 2`).
///
/// # Errors
///
/// Returns [`GatewayError::Json`] if the presence cannot be serialized.
pub fn identify(token: &Token, shard: ShardId, options: &IdentifyOptions) -> GatewayResult<Frame> {
    Frame::command(
        opcode::IDENTIFY,
        &Identify {
            token: token.expose(),
            intents: options.intents,
            shard: [shard.id, shard.total],
            properties: &options.properties,
            large_threshold: options.large_threshold,
            presence: options.presence.as_ref(),
        },
    )
}

/// Build a resume frame (`op 6`).
#[must_use]
pub fn resume(token: &Token, session_id: &str, seq: u64) -> Frame {
    Frame::new(
        opcode::RESUME,
        serde_json::json!({
            "token": token.expose(),
            "session_id": session_id,
            "seq": seq,
        }),
    )
}

/// Build a heartbeat frame (`op 1`) carrying the last sequence.
#[must_use]
pub fn heartbeat(seq: Option<u64>) -> Frame {
    Frame::new(opcode::HEARTBEAT, seq.map_or(Value::Null, Value::from))
}

/// Build a voice state update (`op 4`).
///
/// # Errors
///
/// Returns [`GatewayError::Json`] on serialization failure.
pub fn voice_state_update(update: &UpdateVoiceState) -> GatewayResult<Frame> {
    Frame::command(opcode::VOICE_STATE_UPDATE, update)
}

/// Build a presence update (`op 3`).
///
/// # Errors
///
/// Returns [`GatewayError::Json`] on serialization failure.
pub fn presence_update(presence: &PresenceUpdate) -> GatewayResult<Frame> {
    Frame::command(opcode::PRESENCE_UPDATE, presence)
}

/// Build a guild member request (`op 8`).
///
/// # Errors
///
/// Returns [`GatewayError::Json`] on serialization failure.
pub fn request_guild_members(request: &RequestGuildMembers) -> GatewayResult<Frame> {
    Frame::command(opcode::REQUEST_GUILD_MEMBERS, request)
}

/// Returns `true` if `url` may be used for resuming (`wss://` with a host).
#[must_use]
pub fn is_valid_resume_url(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|parsed| parsed.scheme() == "wss" && parsed.host().is_some())
}

/// Append the protocol version and encoding to a gateway base URL.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidUrl`] if `base` is not a `ws`/`wss` URL.
pub fn connect_url(base: &str) -> GatewayResult<String> {
    let mut url = url::Url::parse(base).map_err(|e| GatewayError::InvalidUrl(format!("{base}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(GatewayError::InvalidUrl(format!("{base}: not a WebSocket URL")));
    }
    url.query_pairs_mut()
        .clear()
        .append_pair("v", "10")
        .append_pair("encoding", "json");
    Ok(url.into())
}
