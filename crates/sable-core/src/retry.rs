//! Bounded retry schedule for transient REST failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capped exponential retry schedule.
///
/// `max_attempts` counts every send, including the first; a value of 1
/// disables retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of sends for one request.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Apply full jitter to each delay.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration without jitter.
    #[must_use]
    pub const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            jitter: false,
        }
    }

    /// A schedule that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns `true` if another send is allowed after `attempts` sends.
    #[must_use]
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `retry` (1-indexed), without jitter.
    ///
    /// Returns zero for retry 0, then `initial_delay * 2^(retry-1)` capped
    /// at `max_delay`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, jittered when enabled.
    #[must_use]
    pub fn delay_with_jitter(&self, retry: u32) -> Duration {
        let delay = self.delay_for_retry(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(fastrand::u64(0..=ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let cfg = RetryConfig::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(cfg.delay_for_retry(0), Duration::ZERO);
        assert_eq!(cfg.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_retry(3), Duration::from_millis(350));
        assert_eq!(cfg.delay_for_retry(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_ceiling() {
        let cfg = RetryConfig::new(5, Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(true);
        for retry in 1..6 {
            assert!(cfg.delay_with_jitter(retry) <= cfg.delay_for_retry(retry));
        }
    }

    #[test]
    fn no_retry_allows_single_attempt() {
        let cfg = RetryConfig::no_retry();
        assert!(cfg.allows_retry(0));
        assert!(!cfg.allows_retry(1));
    }

    #[test]
    fn default_is_three_attempts() {
        let cfg = RetryConfig::default();
        assert!(cfg.allows_retry(2));
        assert!(!cfg.allows_retry(3));
    }
}
