//! Sliding-window request counter.
//!
//! Backed by a `VecDeque<Instant>` of recent acquisitions. Used for the REST
//! global limit (requests per second) and the gateway outbound command
//! limit (commands per minute).

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Counts acquisitions within a trailing window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Allow `limit` acquisitions per `window`. A limit of 0 disables the
    /// window entirely.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: VecDeque::with_capacity(limit),
        }
    }

    /// Configured limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Configured window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record an acquisition at `now`, or return how long until one is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when the window is full.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if self.limit == 0 {
            return Ok(());
        }
        self.prune(now);
        if self.hits.len() < self.limit {
            self.hits.push_back(now);
            return Ok(());
        }
        let wait = self.hits.front().map_or(Duration::ZERO, |oldest| {
            self.window
                .saturating_sub(now.saturating_duration_since(*oldest))
        });
        Err(wait)
    }

    /// Acquisitions still available at `now`.
    pub fn remaining(&mut self, now: Instant) -> usize {
        if self.limit == 0 {
            return usize::MAX;
        }
        self.prune(now);
        self.limit.saturating_sub(self.hits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_reports_wait() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_secs(10));
        assert!(window.try_acquire(start).is_ok());
        assert!(window.try_acquire(start + Duration::from_secs(4)).is_ok());

        let wait = window
            .try_acquire(start + Duration::from_secs(6))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(4));
    }

    #[test]
    fn old_hits_expire() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(1, Duration::from_secs(1));
        assert!(window.try_acquire(start).is_ok());
        assert_eq!(window.remaining(start), 0);
        assert!(window.try_acquire(start + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let now = Instant::now();
        let mut window = SlidingWindow::new(0, Duration::from_secs(1));
        for _ in 0..1000 {
            assert!(window.try_acquire(now).is_ok());
        }
        assert_eq!(window.remaining(now), usize::MAX);
    }
}
