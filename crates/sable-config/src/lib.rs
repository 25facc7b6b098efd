//! Sable Config - TOML configuration for the client.
//!
//! A single [`ClientConfig`] covers REST dispatch, gateway sessions, voice
//! and logging. Every section has defaults, so an empty file is a working
//! configuration.
//!
//! ```rust,no_run
//! use sable_config::ClientConfig;
//!
//! let config = ClientConfig::load_or_default(std::path::Path::new("sable.toml")).unwrap();
//! let token = config.resolve_token().unwrap();
//! # let _ = token;
//! ```
//!
//! This crate holds plain data only. Conversion into the transport crates'
//! configuration types happens in `sable-client`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Configuration error types.
pub mod error;
/// File loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;
