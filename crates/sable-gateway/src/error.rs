//! Error types for the gateway session.

/// Errors produced by a gateway session.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unexpected frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server invalidated the session.
    #[error("Session invalidated (resumable: {resumable})")]
    SessionInvalidated {
        /// Whether the server allows resuming.
        resumable: bool,
    },

    /// A heartbeat was not acknowledged before the next was due.
    #[error("Heartbeat not acknowledged, connection zombied")]
    Zombied,

    /// Authentication failed (close code 4004).
    #[error("Authentication failed (close code 4004)")]
    AuthenticationFailed,

    /// Unrecoverable close code from the server.
    #[error("Fatal close code: {0}")]
    FatalClose(u16),

    /// The server did not send Hello in time.
    #[error("Timed out waiting for Hello")]
    HelloTimeout,

    /// The `WebSocket` handshake did not complete in time.
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    /// Reconnect budget exhausted.
    #[error("Gave up after {0} reconnect attempts")]
    MaxReconnects(u32),

    /// Gateway URL could not be parsed.
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// The session was closed by the caller.
    #[error("Session shut down")]
    Shutdown,
}

impl GatewayError {
    /// Returns `true` if the session must not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::FatalClose(_) | Self::MaxReconnects(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = GatewayError::AuthenticationFailed;
        assert!(err.to_string().contains("4004"));

        let err = GatewayError::FatalClose(4014);
        assert!(err.to_string().contains("4014"));

        let err = GatewayError::HelloTimeout;
        assert!(err.to_string().contains("Hello"));

        let err = GatewayError::Protocol("bad frame".into());
        assert!(err.to_string().contains("bad frame"));
    }

    #[test]
    fn fatal_classification() {
        assert!(GatewayError::AuthenticationFailed.is_fatal());
        assert!(GatewayError::FatalClose(4013).is_fatal());
        assert!(GatewayError::MaxReconnects(3).is_fatal());
        assert!(!GatewayError::Zombied.is_fatal());
        assert!(!GatewayError::HelloTimeout.is_fatal());
        assert!(!GatewayError::SessionInvalidated { resumable: false }.is_fatal());
    }
}
