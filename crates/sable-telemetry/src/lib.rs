//! Sable Telemetry - logging setup for the Sable client.
//!
//! All Sable crates instrument with `tracing`; this crate installs the
//! subscriber that renders those events. Shard, bucket and voice fields
//! are emitted as structured fields, so the JSON format is the one to use
//! for log aggregation.
//!
//! # Example
//!
//! ```rust,no_run
//! use sable_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), sable_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("sable_gateway=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!(shard = 0, "Logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
