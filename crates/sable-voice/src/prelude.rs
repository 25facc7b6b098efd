//! Prelude module - commonly used types for convenient import.
//!
//! Use `use sable_voice::prelude::*;` to import all essential types.

pub use crate::{
    EncryptionMode, VoiceConfig, VoiceConnectInfo, VoiceError, VoiceEvent, VoiceHandle,
    VoiceResult, VoiceSession, VoiceState,
};
