//! Sable Gateway - persistent event sessions.
//!
//! A [`GatewaySession`] owns one shard's `WebSocket` connection: Hello,
//! identify or resume, jittered heartbeats with zombie detection, ordered
//! dispatch delivery, and reconnects classified by close code. Sessions
//! are driven through a cloneable [`GatewayHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use sable_core::Token;
//! use sable_gateway::{GatewayConfig, GatewaySession, IdentifyGate, SessionEvent, ShardId};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (handle, mut events, _task) = GatewaySession::spawn(
//!     Token::bot("...")?,
//!     ShardId::ONE,
//!     GatewayConfig::default(),
//!     IdentifyGate::default(),
//! );
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Dispatch { event, .. } = event {
//!         println!("{}", event.name());
//!     }
//! }
//! handle.close();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod close_code;
pub mod prelude;
pub mod protocol;

mod connection;
mod error;
mod heartbeat;
mod limiter;
mod session;
mod state;
mod writer;

pub use close_code::CloseAction;
pub use error::{GatewayError, GatewayResult};
pub use heartbeat::HeartbeatState;
pub use limiter::{IDENTIFY_INTERVAL, IdentifyGate};
pub use protocol::{
    Activity, ConnectionProperties, DispatchEvent, Frame, GatewayEvent, IdentifyOptions,
    PresenceUpdate, Ready, ReadyUser, RequestGuildMembers, Status, UpdateVoiceState, VoiceServerUpdate,
    VoiceState,
};
pub use session::{
    GatewayConfig, GatewayHandle, GatewaySession, LoopAction, SessionEvent,
};
pub use state::{SessionSnapshot, SessionState, ShardId};
