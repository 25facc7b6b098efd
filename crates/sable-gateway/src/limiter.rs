//! Identify gate shared by every shard of one client.
//!
//! The server allows one identify per `max_concurrency` bucket every five
//! seconds. Shard `n` belongs to bucket `n % max_concurrency`; shards in the
//! same bucket queue on that bucket's lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default spacing between identifies in one bucket.
pub const IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Spaces out identifies across shards.
#[derive(Debug, Clone)]
pub struct IdentifyGate {
    interval: Duration,
    buckets: Arc<[Mutex<Option<Instant>>]>,
}

impl IdentifyGate {
    /// Gate with `max_concurrency` buckets (at least one).
    #[must_use]
    pub fn new(max_concurrency: u32, interval: Duration) -> Self {
        let count = max_concurrency.max(1);
        Self {
            interval,
            buckets: (0..count).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.buckets.len()
    }

    /// Wait for `shard_id`'s turn to identify.
    pub async fn wait(&self, shard_id: u32) {
        let index = usize::try_from(shard_id)
            .ok()
            .and_then(|id| id.checked_rem(self.buckets.len()))
            .unwrap_or(0);
        let Some(bucket) = self.buckets.get(index) else {
            return;
        };

        let mut last = bucket.lock().await;
        if let Some(ready) = last.and_then(|prev| prev.checked_add(self.interval))
            && ready > Instant::now()
        {
            debug!(
                shard = shard_id,
                bucket = index,
                wait_ms = ready.saturating_duration_since(Instant::now()).as_millis(),
                "Waiting for identify slot"
            );
            tokio::time::sleep_until(ready).await;
        }
        *last = Some(Instant::now());
    }
}

impl Default for IdentifyGate {
    fn default() -> Self {
        Self::new(1, IDENTIFY_INTERVAL)
    }
}
