//! Scripted and simulated REST transports.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sable_http::{HttpTransport, RestError, RestResult, TransportRequest, TransportResponse};
use tokio::time::Instant;

/// Build a response from a status, header pairs and a body.
#[must_use]
pub fn mock_response(status: u16, headers: &[(&str, &str)], body: &str) -> TransportResponse {
    TransportResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), (*v).to_string()))
            .collect(),
        body: body.as_bytes().to_vec(),
    }
}

/// A request as seen by a mock transport.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// When it arrived.
    pub at: Instant,
    /// The request.
    pub request: TransportRequest,
}

/// Transport that replays queued responses in order.
///
/// Once the queue is empty every request gets `200 {}`.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<RestResult<TransportResponse>>>>,
    sent: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    #[must_use]
    pub fn with_response(self, response: TransportResponse) -> Self {
        self.push(Ok(response));
        self
    }

    /// Queue a network failure.
    #[must_use]
    pub fn with_network_error(self, message: &str) -> Self {
        self.push(Err(RestError::network(message.to_string())));
        self
    }

    /// Queue a result.
    pub fn push(&self, result: RestResult<TransportResponse>) {
        self.responses.lock().unwrap().push_back(result);
    }

    /// Everything sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of requests sent so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: TransportRequest) -> RestResult<TransportResponse> {
        self.sent.lock().unwrap().push(RecordedRequest {
            at: Instant::now(),
            request,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(mock_response(200, &[], "{}")))
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

/// Transport that behaves like a rate-limited server.
///
/// Each URL path is its own bucket allowing `limit` requests per `window`.
/// Responses carry `X-RateLimit-*` headers; over-limit requests get a 429
/// and are counted as violations.
#[derive(Debug, Clone)]
pub struct SimulatedBucketServer {
    limit: u32,
    window: Duration,
    latency: Duration,
    windows: Arc<Mutex<HashMap<String, Window>>>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
    violations: Arc<Mutex<u32>>,
}

impl SimulatedBucketServer {
    /// Server allowing `limit` requests per `window` on each path.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            latency: Duration::ZERO,
            windows: Arc::default(),
            log: Arc::default(),
            violations: Arc::default(),
        }
    }

    /// Delay every response by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests answered with a 429.
    #[must_use]
    pub fn violations(&self) -> u32 {
        *self.violations.lock().unwrap()
    }

    /// Every request received, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap().clone()
    }

    fn path(url: &str) -> String {
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let path = rest.find('/').and_then(|i| rest.get(i..)).unwrap_or("/");
        path.split('?').next().unwrap_or(path).to_string()
    }

    fn answer(&self, path: &str, now: Instant) -> TransportResponse {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(path.to_string()).or_insert(Window {
            started: now,
            used: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.used = 0;
        }

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(window.started))
            .as_secs_f64();
        let bucket = format!("bucket-{path}");
        let limit = self.limit.to_string();
        let reset_after = format!("{reset_after:.3}");

        if window.used >= self.limit {
            let mut violations = self.violations.lock().unwrap();
            *violations = violations.saturating_add(1);
            let body = format!(
                r#"{{"message":"You are being rate limited.","retry_after":{reset_after},"global":false}}"#
            );
            return mock_response(
                429,
                &[
                    ("x-ratelimit-limit", &limit),
                    ("x-ratelimit-remaining", "0"),
                    ("x-ratelimit-reset-after", &reset_after),
                    ("x-ratelimit-bucket", &bucket),
                    ("x-ratelimit-scope", "user"),
                    ("retry-after", &reset_after),
                ],
                &body,
            );
        }

        window.used = window.used.saturating_add(1);
        let remaining = self.limit.saturating_sub(window.used).to_string();
        mock_response(
            200,
            &[
                ("x-ratelimit-limit", &limit),
                ("x-ratelimit-remaining", &remaining),
                ("x-ratelimit-reset-after", &reset_after),
                ("x-ratelimit-bucket", &bucket),
            ],
            "{}",
        )
    }
}

#[async_trait]
impl HttpTransport for SimulatedBucketServer {
    async fn execute(&self, request: TransportRequest) -> RestResult<TransportResponse> {
        let now = Instant::now();
        let path = Self::path(&request.url);
        self.log.lock().unwrap().push(RecordedRequest { at: now, request });
        let response = self.answer(&path, now);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(response)
    }
}
