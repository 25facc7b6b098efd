//! Sable Voice - voice connection handshake.
//!
//! A [`VoiceSession`] takes the details from the gateway's voice state and
//! voice server updates and negotiates a media path: voice `WebSocket`
//! identify, UDP IP discovery, protocol selection and the session key,
//! then keeps the UDP path alive. Audio encoding and media encryption are
//! left to the caller.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod discovery;
pub mod prelude;
pub mod protocol;

mod connection;
mod crypto;
mod error;
mod keepalive;
mod session;

pub use crypto::{EncryptionMode, SECRET_KEY_LEN, SecretKey};
pub use discovery::DiscoveredAddress;
pub use error::{VoiceError, VoiceResult};
pub use keepalive::KeepaliveConfig;
pub use session::{
    VoiceConfig, VoiceConnectInfo, VoiceEvent, VoiceHandle, VoiceSession, VoiceSnapshot,
    VoiceState,
};
