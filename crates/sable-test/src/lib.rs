//! Sable Test - shared test utilities.
//!
//! Loopback servers and scripted transports used as a dev-dependency by
//! the other Sable crates.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! sable-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use sable_test::MockGateway;
//!
//! #[tokio::test]
//! async fn hello() {
//!     let mut gateway = MockGateway::start().await;
//!     // point a session at gateway.url() ...
//!     let mut conn = gateway.accept().await;
//!     conn.hello(45_000).await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![allow(clippy::missing_panics_doc)]

pub mod gateway;
pub mod logging;
pub mod rest;
pub mod voice;

pub use gateway::*;
pub use logging::*;
pub use rest::*;
pub use voice::*;
