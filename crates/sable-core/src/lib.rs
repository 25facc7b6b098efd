//! Sable Core - shared primitives for the Sable real-time service client.
//!
//! This crate provides:
//! - [`Snowflake`] identifiers with their embedded timestamp and shard routing
//! - The tri-state [`Field`] wrapper for outbound request bodies
//! - The redacting [`Token`] credential holder
//! - Full-jitter [`Backoff`] and capped exponential [`RetryConfig`]
//! - A [`SlidingWindow`] counter shared by the REST and gateway limiters
//!
//! # Example
//!
//! ```
//! use sable_core::prelude::*;
//!
//! let guild = Snowflake::new(41_771_983_423_143_937);
//! assert_eq!(guild.shard_index(2), 0);
//!
//! let topic: Field<String> = Field::Null;
//! assert!(topic.is_null());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod backoff;
mod error;
mod field;
mod retry;
mod snowflake;
mod token;
mod window;

pub use backoff::Backoff;
pub use error::{CoreError, CoreResult};
pub use field::Field;
pub use retry::RetryConfig;
pub use snowflake::{EPOCH_MS, Snowflake};
pub use token::{Token, TokenKind};
pub use window::SlidingWindow;
