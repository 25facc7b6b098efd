//! Core error types.

use thiserror::Error;

/// Errors produced when constructing core primitives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A snowflake string did not parse as an unsigned 64-bit integer.
    #[error("Invalid snowflake: {0}")]
    InvalidSnowflake(String),

    /// A credential was empty after trimming.
    #[error("Token is empty")]
    EmptyToken,
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
