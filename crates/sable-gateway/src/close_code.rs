//! Close code classification.

use crate::error::GatewayError;

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// Endpoint going away.
pub const GOING_AWAY: u16 = 1001;
/// Authentication failed.
pub const AUTHENTICATION_FAILED: u16 = 4004;
/// Resumed with an invalid sequence.
pub const INVALID_SEQUENCE: u16 = 4007;
/// Session timed out.
pub const SESSION_TIMED_OUT: u16 = 4009;
/// Invalid shard.
pub const INVALID_SHARD: u16 = 4010;
/// Sharding required.
pub const SHARDING_REQUIRED: u16 = 4011;
/// Invalid API version.
pub const INVALID_API_VERSION: u16 = 4012;
/// Invalid intents.
pub const INVALID_INTENTS: u16 = 4013;
/// Disallowed intents.
pub const DISALLOWED_INTENTS: u16 = 4014;

/// Close code sent by the client when it intends to resume.
///
/// Anything but 1000/1001 keeps the session alive server-side.
pub const CLIENT_RECONNECT: u16 = 4000;

/// What a close code means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the existing session.
    Resume,
    /// Reconnect with a fresh identify; the session is gone.
    Reidentify,
    /// Stop; retrying cannot succeed.
    Fatal,
}

/// Classify a close code received from the server.
#[must_use]
pub fn classify(code: u16) -> CloseAction {
    match code {
        AUTHENTICATION_FAILED
        | INVALID_SHARD
        | SHARDING_REQUIRED
        | INVALID_API_VERSION
        | INVALID_INTENTS
        | DISALLOWED_INTENTS => CloseAction::Fatal,
        NORMAL | GOING_AWAY | INVALID_SEQUENCE | SESSION_TIMED_OUT => CloseAction::Reidentify,
        _ => CloseAction::Resume,
    }
}

/// Error for a fatal close code.
#[must_use]
pub fn fatal_error(code: u16) -> GatewayError {
    if code == AUTHENTICATION_FAILED {
        GatewayError::AuthenticationFailed
    } else {
        GatewayError::FatalClose(code)
    }
}
