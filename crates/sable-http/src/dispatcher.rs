//! REST dispatch pipeline.
//!
//! `send` resolves the request's bucket, waits out any exhausted window,
//! takes a global permit, sends, and folds the response's rate-limit
//! headers back into the bucket before releasing it. The bucket lock is
//! held for the whole cycle, so requests sharing a bucket go out one at a
//! time and always see the previous response's limits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sable_core::{RetryConfig, Token};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{ErrorBody, RestError, RestResult};
use crate::global::GlobalLimiter;
use crate::headers::{RateLimitHeaders, RateLimitedBody};
use crate::registry::{BucketRegistry, LockedBucket};
use crate::request::{Request, RetryPolicy};
use crate::response::Response;
use crate::route::{BucketKey, percent_encode};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest};

/// Fallback wait for a 429 with neither header nor body.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Idle-bucket sweep runs once every this many sends (power of two).
const SWEEP_EVERY: u64 = 256;

/// What to do when a bucket or the global limit is exhausted before sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Sleep until the limit resets.
    #[default]
    Wait,
    /// Return [`RestError::RateLimited`] immediately.
    FailFast,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// API base URL including version, e.g. `https://discord.com/api/v10`.
    pub base_url: String,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Per-request network timeout.
    pub timeout: Duration,
    /// Aggregate requests per second across all routes (0 = unlimited).
    pub global_per_second: u32,
    /// Pre-send rate-limit behavior.
    pub mode: RateLimitMode,
    /// 429 responses tolerated per request before giving up.
    pub max_rate_limit_retries: u32,
    /// Schedule for 5xx, 408 and network retries.
    pub retry: RetryConfig,
    /// Buckets unused this long are evicted.
    pub bucket_idle: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_string(),
            user_agent: format!(
                "DiscordBot (https://github.com/sable-rs/sable, {})",
                env!("CARGO_PKG_VERSION")
            ),
            timeout: Duration::from_secs(15),
            global_per_second: 50,
            mode: RateLimitMode::Wait,
            max_rate_limit_retries: 5,
            retry: RetryConfig::default(),
            bucket_idle: Duration::from_secs(300),
        }
    }
}

/// Rate-limited REST client.
pub struct RestDispatcher {
    config: DispatcherConfig,
    token: Token,
    transport: Arc<dyn HttpTransport>,
    registry: BucketRegistry,
    global: GlobalLimiter,
    sends: AtomicU64,
}

impl RestDispatcher {
    /// Create a dispatcher backed by `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Network`] if the HTTP client cannot be built.
    pub fn new(token: Token, config: DispatcherConfig) -> RestResult<Self> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(token, config, Arc::new(transport)))
    }

    /// Create a dispatcher over a custom transport.
    #[must_use]
    pub fn with_transport(
        token: Token,
        config: DispatcherConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let global = GlobalLimiter::new(config.global_per_second);
        Self {
            config,
            token,
            transport,
            registry: BucketRegistry::new(),
            global,
            sends: AtomicU64::new(0),
        }
    }

    /// Bucket registry, for inspection.
    #[must_use]
    pub fn registry(&self) -> &BucketRegistry {
        &self.registry
    }

    /// Send a request, honoring rate limits and the request's retry policy.
    ///
    /// # Errors
    ///
    /// - [`RestError::RateLimited`] when out of 429 retries, under
    ///   [`RetryPolicy::NoRetry`], or in [`RateLimitMode::FailFast`]
    /// - [`RestError::Http`] for other non-2xx responses
    /// - [`RestError::Network`] when the transport fails and retries are
    ///   exhausted
    /// - [`RestError::InvalidRequest`] if the URL cannot be built
    pub async fn send(&self, request: Request) -> RestResult<Response> {
        let key = request.bucket_key();
        let outbound = self.build(&request)?;
        let policy = request.retry_policy();
        let mut attempts: u32 = 0;
        let mut rate_limited: u32 = 0;

        self.maybe_sweep();

        loop {
            let mut locked = self.registry.lock(&key).await;
            self.wait_for_bucket(&key, &mut locked).await?;
            self.wait_for_global().await?;

            trace!(route = %key, attempt = attempts, "Sending request");
            let result = self.transport.execute(outbound.clone()).await;
            let now = Instant::now();

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    drop(locked);
                    attempts = attempts.saturating_add(1);
                    if policy == RetryPolicy::AlwaysRetry && self.config.retry.allows_retry(attempts)
                    {
                        let delay = self.config.retry.delay_with_jitter(attempts);
                        warn!(
                            route = %key,
                            attempt = attempts,
                            delay_ms = delay.as_millis(),
                            error = %err,
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                },
            };

            let headers = RateLimitHeaders::parse(&response.headers);
            locked.guard.update(&headers, now);

            if response.status == 429 {
                let body = RateLimitedBody::parse(&response.body);
                let retry_after = headers
                    .retry_after
                    .or_else(|| body.as_ref().and_then(RateLimitedBody::retry_after))
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                let global = headers.global || body.as_ref().is_some_and(|b| b.global);

                if global {
                    self.global.block_for(retry_after).await;
                } else {
                    locked.guard.exhaust(retry_after, now);
                }
                self.registry.record(&key, &locked.key, &locked.guard);
                let bucket = locked.guard.id().map(str::to_string);
                drop(locked);

                rate_limited = rate_limited.saturating_add(1);
                warn!(
                    route = %key,
                    bucket = bucket.as_deref().unwrap_or("unknown"),
                    retry_after_ms = retry_after.as_millis(),
                    global,
                    hits = rate_limited,
                    "Rate limited (429)"
                );

                if policy == RetryPolicy::NoRetry
                    || self.config.mode == RateLimitMode::FailFast
                    || rate_limited > self.config.max_rate_limit_retries
                {
                    return Err(RestError::RateLimited {
                        retry_after,
                        global,
                        bucket,
                    });
                }
                continue;
            }

            self.registry.record(&key, &locked.key, &locked.guard);
            drop(locked);
            attempts = attempts.saturating_add(1);

            let status = response.status;
            if (200..300).contains(&status) {
                debug!(route = %key, status, "Request succeeded");
                return Ok(Response::new(status, response.headers, response.body));
            }

            if self.should_retry_status(policy, status, attempts) {
                let delay = self.config.retry.delay_with_jitter(attempts);
                warn!(
                    route = %key,
                    status,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retryable HTTP status"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(RestError::Http {
                status,
                body: ErrorBody::parse(&response.body),
            });
        }
    }

    fn should_retry_status(&self, policy: RetryPolicy, status: u16, attempts: u32) -> bool {
        match policy {
            RetryPolicy::AlwaysRetry => {
                matches!(status, 408 | 500 | 502 | 503 | 504)
                    && self.config.retry.allows_retry(attempts)
            },
            RetryPolicy::RetryFirst408 => status == 408 && attempts == 1,
            RetryPolicy::NoRetry => false,
        }
    }

    async fn wait_for_bucket(&self, key: &BucketKey, locked: &mut LockedBucket) -> RestResult<()> {
        loop {
            match locked.guard.try_acquire(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) if self.config.mode == RateLimitMode::FailFast => {
                    return Err(RestError::RateLimited {
                        retry_after: wait,
                        global: false,
                        bucket: locked.guard.id().map(str::to_string),
                    });
                },
                Err(wait) => {
                    debug!(
                        route = %key,
                        bucket = locked.guard.id().unwrap_or("unknown"),
                        wait_ms = wait.as_millis(),
                        "Bucket exhausted, waiting for reset"
                    );
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }

    async fn wait_for_global(&self) -> RestResult<()> {
        if self.config.mode == RateLimitMode::FailFast {
            return self
                .global
                .try_acquire(Instant::now())
                .await
                .map_err(|wait| RestError::RateLimited {
                    retry_after: wait,
                    global: true,
                    bucket: None,
                });
        }
        self.global.acquire().await;
        Ok(())
    }

    fn maybe_sweep(&self) {
        let count = self.sends.fetch_add(1, Ordering::Relaxed);
        if count & (SWEEP_EVERY - 1) == SWEEP_EVERY - 1 {
            self.registry
                .evict_idle(self.config.bucket_idle, Instant::now());
        }
    }

    fn build(&self, request: &Request) -> RestResult<TransportRequest> {
        let path = request.route().compile()?;
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{path}"))
            .map_err(|e| RestError::InvalidRequest(format!("bad url {base}{path}: {e}")))?;
        if !request.query().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query());
        }

        let mut headers = vec![
            ("Authorization".to_string(), self.token.authorization()),
            ("User-Agent".to_string(), self.config.user_agent.clone()),
        ];
        if let Some(reason) = request.reason() {
            headers.push(("X-Audit-Log-Reason".to_string(), percent_encode(reason)));
        }
        if let Some(content_type) = request.body().content_type() {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }

        Ok(TransportRequest {
            method: request.route().method(),
            url: url.into(),
            headers,
            body: request.body().encode(),
        })
    }
}
