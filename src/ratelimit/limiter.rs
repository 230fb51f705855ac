//! Sliding window rate limiter over one-second buckets.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use super::key::{BucketKey, ClientId};
use super::window::WindowConfig;
use crate::store::{CounterStore, Counts, Increment};

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action may proceed; one permit was recorded.
    Allowed,
    /// The client is at its limit.
    Denied {
        /// Seconds until the oldest counted bucket leaves the window
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Whether the action may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Retry hint of a denial, `None` when allowed.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Decision::Allowed => None,
            Decision::Denied { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// Limits each client to `limit` permits in any trailing window.
///
/// The window is approximated by `window_seconds` one-second buckets kept in
/// a [`CounterStore`]. Decisions are recomputed from bucket contents on every
/// call; the limiter itself holds no mutable state and takes no locks.
pub struct SlidingWindowLimiter {
    /// Bucket counts, possibly shared with other processes
    store: Arc<dyn CounterStore>,
    /// The global limit and window length
    window: WindowConfig,
}

impl SlidingWindowLimiter {
    /// Create a new limiter over `store`.
    pub fn new(store: Arc<dyn CounterStore>, window: WindowConfig) -> Self {
        Self { store, window }
    }

    /// The configured window.
    pub fn window(&self) -> WindowConfig {
        self.window
    }

    /// Keys of the buckets covering the window that ends at `now_secs`.
    pub fn bucket_keys(&self, client: &ClientId, now_secs: u64) -> Vec<BucketKey> {
        (self.window.start(now_secs)..=now_secs)
            .map(|second| BucketKey::new(client.clone(), second))
            .collect()
    }

    /// Check the limit for `client` at `now`, recording a permit if allowed.
    ///
    /// The read and the increment are separate store calls, so concurrent
    /// callers for one client can overshoot the limit by the number of calls
    /// in flight. If the store is unavailable the client is admitted.
    pub async fn check_and_record(&self, client: &ClientId, now: SystemTime) -> Decision {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let keys = self.bucket_keys(client, now_secs);
        let counts = self.store.get_many(&keys).await;
        let current_total = counts.total();

        trace!(
            client = %client,
            total = current_total,
            limit = self.window.limit(),
            "Checking rate limit"
        );

        if let Counts::Values(ref values) = counts {
            if current_total >= self.window.limit() {
                let counted = values
                    .iter()
                    .filter(|(_, count)| **count > 0)
                    .map(|(key, _)| key);
                let retry_after_secs = self.retry_after(now_secs, counted);
                debug!(
                    client = %client,
                    total = current_total,
                    limit = self.window.limit(),
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                return Decision::Denied { retry_after_secs };
            }
        }

        let current = BucketKey::new(client.clone(), now_secs);
        match self.store.increment(&current, self.window.duration()).await {
            Increment::Recorded(count) => {
                trace!(client = %client, second = now_secs, count, "Recorded permit");
            }
            Increment::Unavailable => {
                debug!(client = %client, "Permit not recorded, store unavailable");
            }
        }

        Decision::Allowed
    }

    /// Check the limit for `client` at the current system time.
    pub async fn check_and_record_now(&self, client: &ClientId) -> Decision {
        self.check_and_record(client, SystemTime::now()).await
    }

    /// Seconds until the oldest non-empty bucket leaves the window.
    fn retry_after<'a>(&self, now_secs: u64, counted: impl Iterator<Item = &'a BucketKey>) -> u64 {
        let oldest = counted
            .map(|key| key.second)
            .min()
            .unwrap_or(now_secs);
        self.window
            .window_seconds()
            .saturating_sub(now_secs.saturating_sub(oldest))
    }
}
