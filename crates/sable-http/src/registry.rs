//! Route-to-bucket resolution.
//!
//! Two-level lookup: a [`BucketKey`] maps to a server-assigned bucket id
//! once a response has revealed it, and `(bucket id, major parameter)`
//! maps to the shared [`RateLimitBucket`]. Until the id is known a request
//! uses per-route state keyed by its `BucketKey`.
//!
//! Both maps are sharded (`DashMap`); each bucket sits behind its own async
//! mutex so unrelated buckets never contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bucket::RateLimitBucket;
use crate::route::BucketKey;

/// Where a request's rate-limit state lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateKey {
    /// Server-assigned bucket, partitioned by major parameter.
    Shared {
        /// Bucket id from `x-ratelimit-bucket`.
        id: String,
        /// Major parameter value.
        major: Option<String>,
    },
    /// Per-route state for a route whose bucket id is not yet known.
    Route(BucketKey),
}

/// A locked bucket together with the key it was resolved under.
pub struct LockedBucket {
    /// Key the bucket is stored under.
    pub key: StateKey,
    /// Exclusive access to the bucket.
    pub guard: OwnedMutexGuard<RateLimitBucket>,
}

/// Shared registry of rate-limit buckets.
#[derive(Default)]
pub struct BucketRegistry {
    routes: DashMap<BucketKey, String>,
    buckets: DashMap<StateKey, Arc<Mutex<RateLimitBucket>>>,
}

impl BucketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state key for `key`.
    #[must_use]
    pub fn state_key(&self, key: &BucketKey) -> StateKey {
        match self.routes.get(key) {
            Some(id) => StateKey::Shared {
                id: id.value().clone(),
                major: key.major().map(str::to_string),
            },
            None => StateKey::Route(key.clone()),
        }
    }

    /// Learned bucket id for `key`, if any.
    #[must_use]
    pub fn bucket_id(&self, key: &BucketKey) -> Option<String> {
        self.routes.get(key).map(|id| id.value().clone())
    }

    fn bucket(&self, state: &StateKey) -> Arc<Mutex<RateLimitBucket>> {
        Arc::clone(
            self.buckets
                .entry(state.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RateLimitBucket::new(Instant::now()))))
                .value(),
        )
    }

    /// Lock the bucket that currently governs `key`.
    ///
    /// If the route is re-pointed at a shared bucket while this call waits
    /// on the per-route lock, the lock is released and the shared bucket is
    /// locked instead.
    pub async fn lock(&self, key: &BucketKey) -> LockedBucket {
        loop {
            let state = self.state_key(key);
            let guard = self.bucket(&state).lock_owned().await;
            if self.state_key(key) == state {
                return LockedBucket { key: state, guard };
            }
            debug!(route = %key, "Route re-pointed while waiting, relocking");
        }
    }

    /// Record the bucket id a response reported for `key`.
    ///
    /// Seeds the shared bucket from `snapshot` when it does not exist yet,
    /// or refreshes it when nobody else holds it.
    pub fn record(&self, key: &BucketKey, held: &StateKey, snapshot: &RateLimitBucket) {
        let Some(id) = snapshot.id() else {
            return;
        };

        let previous = self.routes.insert(key.clone(), id.to_string());
        match previous.as_deref() {
            None => debug!(route = %key, bucket = id, "Learned bucket"),
            Some(old) if old != id => {
                info!(route = %key, old, new = id, "Bucket reassigned by server");
            },
            Some(_) => {},
        }

        let shared = StateKey::Shared {
            id: id.to_string(),
            major: key.major().map(str::to_string),
        };
        if &shared == held {
            return;
        }
        match self.buckets.get(&shared) {
            Some(existing) => {
                if let Ok(mut bucket) = existing.try_lock() {
                    bucket.merge_from(snapshot);
                }
            },
            None => {
                self.buckets
                    .entry(shared)
                    .or_insert_with(|| Arc::new(Mutex::new(snapshot.clone())));
            },
        }
    }

    /// Drop buckets idle for at least `idle` that nobody holds.
    ///
    /// Returns the number of buckets evicted.
    pub fn evict_idle(&self, idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            bucket
                .try_lock()
                .map_or(true, |state| state.idle_for(now) < idle)
        });
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle rate-limit buckets");
        }
        evicted
    }

    /// Number of live bucket states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no bucket state exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
