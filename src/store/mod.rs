//! Shared counter store backing rate and usage counters.
//!
//! Two interchangeable backends: Redis for multi-instance deployments and an
//! in-memory map for single-process fallback and tests. The backend is picked
//! once at startup and stays fixed for the process lifetime.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::config::Config;

/// How long to wait for the Redis connection attempt before falling back.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
#[error("counter store error: {0}")]
pub struct StoreError(pub String);

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError(err.to_string())
    }
}

/// Key-value store with atomic increments and per-key TTL.
///
/// Backend errors propagate as `StoreError`; callers (rate limiter, usage
/// accountant) decide their own fallback policy. The store itself never
/// substitutes defaults.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value, optionally with a TTL. A `None` TTL persists the key.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomically increment by 1, creating the key at 1 if absent.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomically increment by `amount`, creating the key at `amount` if absent.
    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError>;

    /// Set or refresh the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Connect to Redis with a short bounded timeout, falling back to the
/// in-memory store for the process lifetime if it is unreachable.
pub async fn connect(config: &Config) -> Arc<dyn CounterStore> {
    match RedisStore::connect(&config.redis_url(), CONNECT_TIMEOUT).await {
        Ok(store) => {
            info!("Connected to Redis at {}", config.redis_url());
            Arc::new(store)
        }
        Err(e) => {
            warn!("Failed to connect to Redis: {e}. Using in-memory counter store.");
            Arc::new(MemoryStore::new())
        }
    }
}
