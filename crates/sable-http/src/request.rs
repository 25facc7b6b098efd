//! Outbound request description.

use serde::Serialize;

use crate::error::RestResult;
use crate::route::{BucketKey, Route};

/// How the dispatcher retries a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry 429, 408, 5xx and network errors within the retry budget.
    #[default]
    AlwaysRetry,
    /// Retry 429, and a 408 only on the first attempt.
    RetryFirst408,
    /// Send once; a 429 is returned as an error immediately.
    NoRetry,
}

/// Encoded request body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Serialized JSON.
    Json(Vec<u8>),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
}

impl Body {
    /// `Content-Type` for this body.
    #[must_use]
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some("application/json"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
        }
    }

    /// Encoded bytes, if any.
    #[must_use]
    pub fn encode(&self) -> Option<Vec<u8>> {
        match self {
            Self::Empty => None,
            Self::Json(bytes) => Some(bytes.clone()),
            Self::Form(fields) => Some(
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish()
                    .into_bytes(),
            ),
        }
    }
}

/// An immutable request ready for [`RestDispatcher::send`](crate::RestDispatcher::send).
#[derive(Debug, Clone)]
pub struct Request {
    route: Route,
    body: Body,
    query: Vec<(String, String)>,
    reason: Option<String>,
    retry: RetryPolicy,
}

impl Request {
    /// Start building a request for `route`.
    #[must_use]
    pub fn builder(route: Route) -> RequestBuilder {
        RequestBuilder {
            request: Self {
                route,
                body: Body::Empty,
                query: Vec::new(),
                reason: None,
                retry: RetryPolicy::default(),
            },
        }
    }

    /// Shorthand for a bodiless request with default policy.
    #[must_use]
    pub fn new(route: Route) -> Self {
        Self::builder(route).build()
    }

    /// Target route.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Query parameters.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Audit-log reason.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Rate-limit identity.
    #[must_use]
    pub fn bucket_key(&self) -> BucketKey {
        self.route.bucket_key()
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Serialize `value` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Serialization`](crate::RestError::Serialization)
    /// if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> RestResult<Self> {
        self.request.body = Body::Json(serde_json::to_vec(value)?);
        Ok(self)
    }

    /// Use URL-encoded form fields as the body.
    #[must_use]
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.request.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.request.query.push((key.into(), value.to_string()));
        self
    }

    /// Set the audit-log reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.request.reason = Some(reason.into());
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.request.retry = policy;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Method;

    #[test]
    fn builder_sets_all_parts() {
        let request = Request::builder(
            Route::new(Method::Post, "/channels/{channel_id}/messages").param("channel_id", 9),
        )
        .json(&serde_json::json!({"content": "hi"}))
        .unwrap()
        .query("wait", true)
        .reason("cleanup")
        .retry(RetryPolicy::NoRetry)
        .build();

        assert_eq!(request.body().content_type(), Some("application/json"));
        assert_eq!(request.query(), &[("wait".to_string(), "true".to_string())]);
        assert_eq!(request.reason(), Some("cleanup"));
        assert_eq!(request.retry_policy(), RetryPolicy::NoRetry);
        assert_eq!(request.bucket_key().major(), Some("9"));
    }

    #[test]
    fn form_body_is_urlencoded() {
        let body = Request::builder(Route::new(Method::Post, "/oauth2/token"))
            .form([("grant_type", "client_credentials"), ("scope", "identify connections")])
            .build()
            .body()
            .encode()
            .unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "grant_type=client_credentials&scope=identify+connections"
        );
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let request = Request::new(Route::new(Method::Get, "/gateway/bot"));
        assert_eq!(request.body(), &Body::Empty);
        assert_eq!(request.body().content_type(), None);
        assert_eq!(request.retry_policy(), RetryPolicy::AlwaysRetry);
    }
}
