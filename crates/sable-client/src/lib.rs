//! Sable Client - connection supervisor.
//!
//! [`ConnectionSupervisor`] runs one gateway session per shard, routes
//! decoded events to [`EventHandler`]s on a per-shard pump so handlers never
//! stall the transport, reports [`LifecycleEvent`]s, and owns the voice
//! connections joined through the gateway.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sable_client::{ConnectionSupervisor, EventHandler};
//! use sable_config::ClientConfig;
//! use sable_gateway::{DispatchEvent, ShardId};
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventHandler for Logger {
//!     async fn dispatch(&self, shard: ShardId, event: &DispatchEvent) {
//!         println!("{shard} {}", event.name());
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::load_or_default(std::path::Path::new("sable.toml"))?;
//! let supervisor = ConnectionSupervisor::builder(config)
//!     .handler(Logger)
//!     .start()
//!     .await?;
//! supervisor.wait_until_connected().await?;
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bridge;
pub mod prelude;

mod error;
mod handler;
mod supervisor;
mod voice;

pub use error::{ClientError, ClientResult};
pub use handler::{EventHandler, LifecycleEvent};
pub use supervisor::{ConnectionSupervisor, SupervisorBuilder};
