//! Counter stores holding per-second bucket counts.
//!
//! The limiter talks to a store only through [`CounterStore`]. Two
//! implementations exist: an in-process table and a Redis client shared
//! across processes. A networked store never reports errors to its caller;
//! failures surface as [`Counts::Unavailable`] / [`Increment::Unavailable`]
//! so the limiter can fail open.

mod memory;
mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StoreBackend, TurnstileConfig};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::BucketKey;

pub use memory::MemoryStore;
pub use redis_store::{RedisOptions, RedisStore};

/// Outcome of a bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Counts {
    /// Counts of the buckets that exist; missing keys read as 0.
    Values(HashMap<BucketKey, u64>),
    /// The backend could not be consulted.
    Unavailable,
}

impl Counts {
    /// Sum of all bucket counts, 0 when unavailable.
    pub fn total(&self) -> u64 {
        match self {
            Counts::Values(values) => values.values().sum(),
            Counts::Unavailable => 0,
        }
    }
}

/// Outcome of an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    /// The bucket count after the increment.
    Recorded(u64),
    /// The backend could not be consulted; nothing was recorded.
    Unavailable,
}

/// Trait for counter store implementations.
///
/// Increments to a single key must be linearizable.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the counts of `keys`, omitting absent or expired buckets.
    async fn get_many(&self, keys: &[BucketKey]) -> Counts;

    /// Atomically add one to `key`, creating it with `ttl` if absent.
    async fn increment(&self, key: &BucketKey, ttl: Duration) -> Increment;
}

/// Build the store selected by configuration.
pub fn from_config(config: &TurnstileConfig) -> Result<Arc<dyn CounterStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-process counter store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let target = config.redis_connection_string.as_deref().ok_or_else(|| {
                TurnstileError::Config(
                    "REDIS_CONNECTION_STRING is required for the redis backend".to_string(),
                )
            })?;
            let store = RedisStore::connect(target, RedisOptions::from(config))?;
            info!(server = %store.server(), "Using redis counter store");
            Ok(Arc::new(store))
        }
    }
}
