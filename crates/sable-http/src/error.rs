//! REST error types.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Error payload returned by the API for non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorBody {
    /// Numeric API error code (0 when absent).
    #[serde(default)]
    pub code: u64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Nested per-field validation errors, if any.
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Parse an error body, falling back to the raw text as the message.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|_| Self {
            code: 0,
            message: String::from_utf8_lossy(bytes).into_owned(),
            errors: None,
        })
    }
}

/// Errors returned by [`RestDispatcher::send`](crate::RestDispatcher::send).
#[derive(Debug, Error)]
pub enum RestError {
    /// Transport failure before a response was received.
    #[error("Network error: {0}")]
    Network(Box<dyn std::error::Error + Send + Sync>),

    /// Rate limited and out of retries, or configured to fail fast.
    #[error("Rate limited for {retry_after:?} (global: {global}, bucket: {bucket:?})")]
    RateLimited {
        /// How long until the limit resets.
        retry_after: Duration,
        /// Whether the global limit was hit.
        global: bool,
        /// Server-assigned bucket id, when known.
        bucket: Option<String>,
    },

    /// Non-2xx, non-429 response.
    #[error("HTTP {status}: {} (code {})", body.message, body.code)]
    Http {
        /// Response status code.
        status: u16,
        /// Parsed error payload.
        body: ErrorBody,
    },

    /// Request or response body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request could not be built (missing route parameter, bad URL).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RestError {
    /// Wrap an arbitrary transport failure.
    pub fn network(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Network(err.into())
    }

    /// HTTP status of the failed response, if one was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Network(_) | Self::Serialization(_) | Self::InvalidRequest(_) => None,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(Box::new(err))
    }
}

/// Result type for REST operations.
pub type RestResult<T> = Result<T, RestError>;
