//! Prelude module - commonly used types for convenient import.
//!
//! Use `use sable_http::prelude::*;` to import all essential types.

// Errors
pub use crate::{ErrorBody, RestError, RestResult};

// Dispatch
pub use crate::{DispatcherConfig, RateLimitMode, RestDispatcher};

// Requests
pub use crate::{Body, Method, PatchBody, Request, RequestBuilder, Response, RetryPolicy, Route};

// Transport seam
pub use crate::{HttpTransport, TransportRequest, TransportResponse};
