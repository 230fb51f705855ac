//! In-process counter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::{CounterStore, Counts, Increment};
use crate::ratelimit::BucketKey;

/// Increments between two sweeps of expired buckets.
const PURGE_EVERY: u64 = 4096;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    expires_at: Instant,
}

/// Counter table local to this process.
///
/// Each increment holds the shard lock of its key for the whole
/// read-modify-write, so concurrent increments of one key never get lost.
/// Expired buckets are swept every few thousand increments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: DashMap<BucketKey, Bucket>,
    increments: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired bucket and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.expires_at > now);
        let removed = before.saturating_sub(self.buckets.len());
        trace!(removed, "Purged expired buckets");
        removed
    }

    /// Number of buckets held, expired or not.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the table holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get_many(&self, keys: &[BucketKey]) -> Counts {
        let now = Instant::now();
        let values = keys
            .iter()
            .filter_map(|key| {
                self.buckets
                    .get(key)
                    .filter(|bucket| bucket.expires_at > now)
                    .map(|bucket| (key.clone(), bucket.count))
            })
            .collect();
        Counts::Values(values)
    }

    async fn increment(&self, key: &BucketKey, ttl: Duration) -> Increment {
        let now = Instant::now();
        let count = {
            let mut bucket = self.buckets.entry(key.clone()).or_insert(Bucket {
                count: 0,
                expires_at: now + ttl,
            });

            // An expired entry that was never purged counts as a fresh bucket.
            if bucket.expires_at <= now {
                bucket.count = 0;
                bucket.expires_at = now + ttl;
            }

            bucket.count += 1;
            bucket.count
        };

        // The shard lock is released above; sweeping takes every shard.
        if self.increments.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }

        Increment::Recorded(count)
    }
}
