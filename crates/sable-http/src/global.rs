//! Global request limiter.
//!
//! Caps aggregate request rate across every route, independent of the
//! per-route buckets. A 429 flagged global blocks the limiter outright for
//! the server's `retry-after`.

use std::time::Duration;

use sable_core::SlidingWindow;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct GlobalState {
    window: SlidingWindow,
    blocked_until: Option<Instant>,
}

/// Requests-per-second limiter shared by all routes.
pub struct GlobalLimiter {
    state: Mutex<GlobalState>,
}

impl GlobalLimiter {
    /// Allow `per_second` requests per second. Zero disables the
    /// per-second cap; global 429 blocks still apply.
    #[must_use]
    pub fn new(per_second: u32) -> Self {
        let limit = usize::try_from(per_second).unwrap_or(usize::MAX);
        Self {
            state: Mutex::new(GlobalState {
                window: SlidingWindow::new(limit, Duration::from_secs(1)),
                blocked_until: None,
            }),
        }
    }

    /// Take a permit at `now`, or report the wait until one is available.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when blocked or over the per-second cap.
    pub async fn try_acquire(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        if let Some(until) = state.blocked_until {
            if now < until {
                return Err(until.saturating_duration_since(now));
            }
            state.blocked_until = None;
        }
        state.window.try_acquire(now)
    }

    /// Wait until a permit is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire(Instant::now()).await {
                Ok(()) => return,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis(), "Waiting on global rate limit");
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }

    /// Block every request for `retry_after`.
    pub async fn block_for(&self, retry_after: Duration) {
        let now = Instant::now();
        let until = now.checked_add(retry_after).unwrap_or(now);
        let mut state = self.state.lock().await;
        let until = state.blocked_until.map_or(until, |existing| existing.max(until));
        state.blocked_until = Some(until);
        warn!(
            retry_after_ms = retry_after.as_millis(),
            "Global rate limit hit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn caps_requests_per_second() {
        let limiter = GlobalLimiter::new(3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.try_acquire(now).await.is_ok());
        }
        assert_eq!(
            limiter.try_acquire(now).await,
            Err(Duration::from_secs(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_window() {
        let limiter = GlobalLimiter::new(1);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn global_block_delays_everything() {
        let limiter = GlobalLimiter::new(0);
        limiter.block_for(Duration::from_secs(2)).await;
        let start = Instant::now();
        assert!(limiter.try_acquire(start).await.is_err());
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
