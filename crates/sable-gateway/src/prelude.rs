//! Prelude module - commonly used types for convenient import.
//!
//! Use `use sable_gateway::prelude::*;` to import all essential types.

// Errors
pub use crate::{GatewayError, GatewayResult};

// Sessions
pub use crate::{
    GatewayConfig, GatewayHandle, GatewaySession, IdentifyGate, SessionEvent, SessionSnapshot,
    SessionState, ShardId,
};

// Payloads
pub use crate::{DispatchEvent, Frame, IdentifyOptions, UpdateVoiceState, VoiceServerUpdate, VoiceState};
