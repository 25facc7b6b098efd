//! Sable HTTP - rate-limited REST dispatch.
//!
//! [`RestDispatcher`] sends [`Request`]s while honoring the server's
//! per-route rate-limit buckets and a process-wide global limit. Bucket
//! identity is learned from response headers: the first call on a route is
//! tracked per route, later calls share the server-assigned bucket.
//!
//! # Example
//!
//! ```rust,no_run
//! use sable_core::Token;
//! use sable_http::{DispatcherConfig, Method, Request, RestDispatcher, Route};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let rest = RestDispatcher::new(Token::bot("...")?, DispatcherConfig::default())?;
//!
//! let roles = Route::new(Method::Get, "/guilds/{guild_id}/roles").param("guild_id", 123);
//! let response = rest.send(Request::new(roles)).await?;
//! let body: serde_json::Value = response.json()?;
//! # let _ = body;
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

mod bucket;
mod dispatcher;
mod endpoints;
mod error;
mod global;
mod headers;
mod patch;
mod registry;
mod request;
mod response;
mod route;
mod transport;

pub use bucket::RateLimitBucket;
pub use dispatcher::{DispatcherConfig, RateLimitMode, RestDispatcher};
pub use endpoints::{GatewayBot, SessionStartLimit};
pub use error::{ErrorBody, RestError, RestResult};
pub use global::GlobalLimiter;
pub use headers::{RateLimitHeaders, RateLimitScope, RateLimitedBody};
pub use patch::PatchBody;
pub use registry::{BucketRegistry, LockedBucket, StateKey};
pub use request::{Body, Request, RequestBuilder, RetryPolicy};
pub use response::Response;
pub use route::{BucketKey, Method, Route};
pub use transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};
