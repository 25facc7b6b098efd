//! HTTP transport seam.
//!
//! The dispatcher talks to the network through [`HttpTransport`] so tests
//! can substitute a scripted server. [`ReqwestTransport`] is the production
//! implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RestError, RestResult};
use crate::route::Method;

/// A fully built outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including query.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Encoded body, if any.
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    /// First value of a header, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A raw response.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// Status code.
    pub status: u16,
    /// Headers with lower-cased names.
    pub headers: HashMap<String, String>,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// Executes HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request and return the raw response.
    ///
    /// Non-2xx statuses are responses, not errors.
    async fn execute(&self, request: TransportRequest) -> RestResult<TransportResponse>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Network`] if the TLS backend fails to initialize.
    pub fn new(timeout: Duration) -> RestResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> RestResult<TransportResponse> {
        let mut builder = self
            .client
            .request(to_reqwest(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = TransportRequest {
            method: Method::Get,
            url: "https://example.test/".into(),
            headers: vec![("Authorization".into(), "Bot x".into())],
            body: None,
        };
        assert_eq!(request.header("authorization"), Some("Bot x"));
        assert_eq!(request.header("x-audit-log-reason"), None);
    }

    #[test]
    fn method_mapping() {
        assert_eq!(to_reqwest(Method::Patch), reqwest::Method::PATCH);
        assert_eq!(to_reqwest(Method::Delete), reqwest::Method::DELETE);
    }
}
