//! Error types for voice connections.

use std::time::Duration;

/// Errors produced by a voice session.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// IP discovery or protocol selection failed. The main gateway is
    /// unaffected.
    #[error("Voice handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server offered no encryption mode we support.
    #[error("No supported encryption mode among {0:?}")]
    UnsupportedMode(Vec<String>),

    /// No UDP traffic from the server within the keepalive threshold.
    #[error("No UDP traffic for {0:?}")]
    KeepaliveTimeout(Duration),

    /// Unrecoverable close code from the voice server.
    #[error("Fatal voice close code: {0}")]
    FatalClose(u16),

    /// A voice heartbeat went unacknowledged.
    #[error("Voice heartbeat not acknowledged, connection zombied")]
    Zombied,

    /// Timed out waiting for a handshake step.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Malformed or unexpected frame.
    #[error("Voice protocol error: {0}")]
    Protocol(String),

    /// Endpoint from the voice server update could not be used.
    #[error("Invalid voice endpoint: {0}")]
    InvalidEndpoint(String),

    /// Operation needs a negotiated session.
    #[error("Voice session is not connected")]
    NotConnected,

    /// Reconnect budget exhausted.
    #[error("Gave up after {0} voice reconnect attempts")]
    MaxReconnects(u32),

    /// UDP socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session was closed by the caller.
    #[error("Voice session shut down")]
    Shutdown,
}

impl VoiceError {
    /// Returns `true` if the voice session must end rather than reconnect.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_)
                | Self::UnsupportedMode(_)
                | Self::FatalClose(_)
                | Self::InvalidEndpoint(_)
                | Self::MaxReconnects(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type for voice operations.
pub type VoiceResult<T> = Result<T, VoiceError>;
