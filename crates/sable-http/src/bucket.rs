//! Per-bucket rate-limit state.
//!
//! A bucket starts out unknown: requests pass through until the first
//! response teaches it a limit. From then on the bucket counts down
//! `remaining` locally and refills once `reset_at` passes, while every
//! response overwrites the local view with the server's.
//!
//! Callers must hold the bucket's lock across acquire, send and update so
//! requests for one bucket never interleave.

use std::time::Duration;

use tokio::time::Instant;

use crate::headers::{RateLimitHeaders, RateLimitScope};

/// Rate-limit state for one bucket.
#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    id: Option<String>,
    limit: u32,
    remaining: u32,
    reset_at: Option<Instant>,
    reset_after: Option<Duration>,
    is_global: bool,
    learned: bool,
    last_used: Instant,
}

impl RateLimitBucket {
    /// A bucket with no known limits.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            id: None,
            limit: 0,
            remaining: 0,
            reset_at: None,
            reset_after: None,
            is_global: false,
            learned: false,
            last_used: now,
        }
    }

    /// Server-assigned bucket id, once known.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Requests allowed per window (0 until learned).
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Requests left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// When the current window ends.
    #[must_use]
    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// Window length last reported by the server.
    #[must_use]
    pub fn reset_after(&self) -> Option<Duration> {
        self.reset_after
    }

    /// Whether the server reported a shared or global scope.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.is_global
    }

    /// Time since this bucket was last used.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    fn refill_if_reset(&mut self, now: Instant) {
        if self.reset_at.is_some_and(|reset| now >= reset) {
            self.remaining = self.limit.max(1);
            self.reset_at = None;
        }
    }

    /// Take a permit, or report how long until one is available.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when the bucket is exhausted.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.last_used = now;
        if !self.learned {
            return Ok(());
        }
        self.refill_if_reset(now);
        if self.remaining > 0 {
            self.remaining = self.remaining.saturating_sub(1);
            return Ok(());
        }
        match self.reset_at {
            Some(reset) => Err(reset.saturating_duration_since(now)),
            // Exhausted without a known reset: let the server decide.
            None => Ok(()),
        }
    }

    /// Apply response headers.
    pub fn update(&mut self, headers: &RateLimitHeaders, now: Instant) {
        self.last_used = now;
        if let Some(bucket) = &headers.bucket {
            self.id = Some(bucket.clone());
        }
        if let Some(scope) = headers.scope {
            self.is_global = matches!(scope, RateLimitScope::Global | RateLimitScope::Shared);
        }
        if !headers.has_window() {
            return;
        }
        self.learned = true;
        if let Some(limit) = headers.limit {
            self.limit = limit;
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = remaining;
        }
        if let Some(after) = headers.time_until_reset() {
            self.reset_after = Some(after);
            self.reset_at = now.checked_add(after);
        }
    }

    /// Force the bucket empty until at least `now + retry_after`.
    pub fn exhaust(&mut self, retry_after: Duration, now: Instant) {
        self.learned = true;
        self.remaining = 0;
        let until = now.checked_add(retry_after).unwrap_or(now);
        self.reset_at = Some(self.reset_at.map_or(until, |existing| existing.max(until)));
    }

    /// Replace the window state with `other`'s, keeping the later reset.
    pub fn merge_from(&mut self, other: &Self) {
        self.id.clone_from(&other.id);
        self.learned |= other.learned;
        self.limit = other.limit;
        self.remaining = other.remaining;
        self.reset_after = other.reset_after;
        self.is_global = other.is_global;
        self.reset_at = match (self.reset_at, other.reset_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => b.or(a),
        };
        self.last_used = self.last_used.max(other.last_used);
    }
}
