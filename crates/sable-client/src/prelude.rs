//! Prelude module - commonly used types for convenient import.
//!
//! Use `use sable_client::prelude::*;` to import all essential types.

pub use crate::{
    ClientError, ClientResult, ConnectionSupervisor, EventHandler, LifecycleEvent,
    SupervisorBuilder,
};
