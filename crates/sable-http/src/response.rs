//! Successful REST response.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::error::RestResult;
use crate::headers::RateLimitHeaders;

/// A 2xx response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Response {
    pub(crate) fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Header value by lower-case name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Rate-limit headers carried by this response.
    #[must_use]
    pub fn rate_limit(&self) -> RateLimitHeaders {
        RateLimitHeaders::parse(&self.headers)
    }

    /// Returns `true` for 204 or a zero-length body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status == 204 || self.body.is_empty()
    }

    /// Raw body.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Serialization`](crate::RestError::Serialization)
    /// if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> RestResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json() {
        let response = Response::new(200, HashMap::new(), br#"{"id":"1"}"#.to_vec());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], "1");
        assert!(!response.is_empty());
    }

    #[test]
    fn no_content_is_empty() {
        let response = Response::new(204, HashMap::new(), Vec::new());
        assert!(response.is_empty());
        assert!(response.json::<serde_json::Value>().is_err());
    }
}
