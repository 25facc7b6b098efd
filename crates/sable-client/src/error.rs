//! Supervisor errors.

use std::time::Duration;

use sable_config::ConfigError;
use sable_core::{CoreError, Snowflake};
use sable_gateway::GatewayError;
use sable_http::RestError;
use sable_voice::VoiceError;
use thiserror::Error;

/// Errors from [`ConnectionSupervisor`](crate::ConnectionSupervisor)
/// operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid credential or identifier.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// REST failure, e.g. while fetching `/gateway/bot`.
    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    /// Gateway failure.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Voice failure.
    #[error("voice error: {0}")]
    Voice(#[from] VoiceError),

    /// The gateway did not deliver both voice updates in time.
    #[error("timed out after {timeout:?} waiting for voice updates for guild {guild}")]
    VoiceJoinTimeout {
        /// Guild being joined.
        guild: Snowflake,
        /// Configured join timeout.
        timeout: Duration,
    },

    /// A newer join or a leave replaced this join.
    #[error("voice join for guild {0} was superseded")]
    VoiceJoinSuperseded(Snowflake),

    /// No shard with this index.
    #[error("unknown shard {0}")]
    UnknownShard(u32),

    /// No READY received yet, so our user id is unknown.
    #[error("not ready: no shard has received READY")]
    NotReady,

    /// The supervisor is shutting down.
    #[error("supervisor is shut down")]
    Shutdown,
}

impl ClientError {
    /// Returns `true` for configuration and credential errors, which a
    /// retry cannot fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Core(_))
    }
}

/// Result alias for supervisor operations.
pub type ClientResult<T> = Result<T, ClientError>;
