//! Endpoints the transport layer itself depends on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::RestDispatcher;
use crate::error::RestResult;
use crate::request::Request;
use crate::route::{Method, Route};

/// Response of `GET /gateway/bot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBot {
    /// WebSocket URL to connect to.
    pub url: String,
    /// Recommended shard count.
    pub shards: u32,
    /// Identify budget for this token.
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget reported by `GET /gateway/bot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Identifies allowed per reset period.
    pub total: u32,
    /// Identifies left in the current period.
    pub remaining: u32,
    /// Milliseconds until the budget resets.
    pub reset_after: u64,
    /// Shards that may identify in the same 5 second slot.
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    /// Time until the budget resets.
    #[must_use]
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

impl RestDispatcher {
    /// Fetch the gateway URL, recommended shard count and identify budget.
    ///
    /// # Errors
    ///
    /// Any [`RestError`](crate::RestError) from [`send`](Self::send), or
    /// `Serialization` if the body is malformed.
    pub async fn gateway_bot(&self) -> RestResult<GatewayBot> {
        self.send(Request::new(Route::new(Method::Get, "/gateway/bot")))
            .await?
            .json()
    }
}
