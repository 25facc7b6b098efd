//! Prelude module - commonly used types for convenient import.
//!
//! Use `use sable_core::prelude::*;` to import all essential types.

pub use crate::{
    Backoff, CoreError, CoreResult, Field, RetryConfig, SlidingWindow, Snowflake, Token,
    TokenKind,
};
