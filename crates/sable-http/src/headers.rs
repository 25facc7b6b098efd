//! Rate-limit response headers.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Scope reported by `x-ratelimit-scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Per-user (bot) limit.
    User,
    /// Global limit across all routes.
    Global,
    /// Per-resource limit shared with other users.
    Shared,
}

impl RateLimitScope {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "global" => Some(Self::Global),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Parsed `x-ratelimit-*` and `retry-after` headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Requests allowed per window.
    pub limit: Option<u32>,
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Absolute reset time as Unix epoch seconds.
    pub reset_epoch: Option<f64>,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
    /// Server-assigned bucket id.
    pub bucket: Option<String>,
    /// Whether a 429 was caused by the global limit.
    pub global: bool,
    /// Limit scope.
    pub scope: Option<RateLimitScope>,
    /// Wait requested by a 429.
    pub retry_after: Option<Duration>,
}

fn seconds(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

impl RateLimitHeaders {
    /// Parse from lower-cased header names.
    #[must_use]
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        let get = |name: &str| headers.get(name).map(String::as_str);
        Self {
            limit: get("x-ratelimit-limit").and_then(|v| v.trim().parse().ok()),
            remaining: get("x-ratelimit-remaining").and_then(|v| v.trim().parse().ok()),
            reset_epoch: get("x-ratelimit-reset").and_then(|v| v.trim().parse().ok()),
            reset_after: get("x-ratelimit-reset-after").and_then(seconds),
            bucket: get("x-ratelimit-bucket").map(str::to_string),
            global: get("x-ratelimit-global").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: get("x-ratelimit-scope").and_then(RateLimitScope::parse),
            retry_after: get("retry-after")
                .and_then(seconds)
                .filter(|wait| !wait.is_zero()),
        }
    }

    /// Returns `true` if the response carried bucket window information.
    #[must_use]
    pub fn has_window(&self) -> bool {
        self.remaining.is_some() && (self.reset_after.is_some() || self.reset_epoch.is_some())
    }

    /// Time until reset, preferring `reset-after` over the absolute reset.
    #[must_use]
    pub fn time_until_reset(&self) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(after);
        }
        let reset = self.reset_epoch?;
        #[allow(clippy::cast_precision_loss)]
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let delta = reset - now;
        Some(Duration::try_from_secs_f64(delta).unwrap_or(Duration::ZERO))
    }
}

/// Body of a 429 response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitedBody {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Seconds to wait.
    #[serde(default)]
    pub retry_after: Option<f64>,
    /// Whether the global limit was hit.
    #[serde(default)]
    pub global: bool,
}

impl RateLimitedBody {
    /// Parse a 429 body, if it is JSON.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// `retry_after` as a duration; `None` if missing or not positive.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|wait| !wait.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_full_header_set() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1470173023.123"),
            ("x-ratelimit-reset-after", "2.5"),
            ("x-ratelimit-bucket", "abcd1234"),
            ("x-ratelimit-scope", "shared"),
        ]));
        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.remaining, Some(0));
        assert_eq!(parsed.reset_after, Some(Duration::from_millis(2500)));
        assert_eq!(parsed.bucket.as_deref(), Some("abcd1234"));
        assert_eq!(parsed.scope, Some(RateLimitScope::Shared));
        assert!(!parsed.global);
        assert!(parsed.has_window());
        assert_eq!(parsed.time_until_reset(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn parses_global_429_headers() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("retry-after", "65"),
            ("x-ratelimit-global", "true"),
            ("x-ratelimit-scope", "global"),
        ]));
        assert!(parsed.global);
        assert_eq!(parsed.retry_after, Some(Duration::from_secs(65)));
        assert!(!parsed.has_window());
    }

    #[test]
    fn absent_headers_are_none() {
        let parsed = RateLimitHeaders::parse(&HashMap::new());
        assert_eq!(parsed, RateLimitHeaders::default());
        assert_eq!(parsed.time_until_reset(), None);
    }

    #[test]
    fn past_absolute_reset_is_zero() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1000"),
        ]));
        assert_eq!(parsed.time_until_reset(), Some(Duration::ZERO));
    }

    #[test]
    fn negative_values_are_ignored() {
        let parsed = RateLimitHeaders::parse(&headers(&[("retry-after", "-1")]));
        assert_eq!(parsed.retry_after, None);
    }

    #[test]
    fn rate_limited_body() {
        let body = RateLimitedBody::parse(
            br#"{"message":"You are being rate limited.","retry_after":0.75,"global":false}"#,
        )
        .unwrap();
        assert_eq!(body.retry_after(), Some(Duration::from_millis(750)));
        assert!(!body.global);
        assert!(RateLimitedBody::parse(b"<html>").is_none());

        let missing =
            RateLimitedBody::parse(br#"{"message":"You are being rate limited.","global":false}"#)
                .unwrap();
        assert_eq!(missing.retry_after(), None);
        let zero = RateLimitedBody::parse(br#"{"retry_after":0,"global":false}"#).unwrap();
        assert_eq!(zero.retry_after(), None);
    }
}
