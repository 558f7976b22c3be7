//! Fixed-window rate limiter over the shared counter store.
//!
//! Windows are 60-second buckets aligned to the epoch. Every check increments
//! the caller's window counter before comparing against the effective limit,
//! so denied requests still consume window slots and retry storms cannot
//! evade the ceiling.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{CounterStore, StoreError};

/// Window length in seconds, also the constant Retry-After hint.
const WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Denied { retry_after_secs: u64 },
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    default_limit: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, default_limit: u64) -> Self {
        Self {
            store,
            default_limit,
        }
    }

    /// Admit or deny a request from `caller` at `now_secs` (seconds since
    /// the epoch).
    ///
    /// Fail-open: if the counter store errors, the request is admitted and
    /// the failure logged. Rate limiting degrades; it never takes the
    /// service down with it.
    pub async fn check_and_increment(&self, caller: &str, now_secs: u64) -> Decision {
        match self.try_check(caller, now_secs).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("rate limit check failed for {caller}, admitting: {e}");
                Decision::Admitted
            }
        }
    }

    async fn try_check(&self, caller: &str, now_secs: u64) -> Result<Decision, StoreError> {
        let limit = self.effective_limit(caller).await?;
        let window_id = now_secs / WINDOW_SECS;
        let window_key = format!("requests:{caller}:{window_id}");

        let count = self.store.incr(&window_key).await?;
        if count == 1 {
            // First increment created the key; the TTL is set once and not
            // refreshed, so the counter dies with its window.
            self.store
                .expire(&window_key, Duration::from_secs(WINDOW_SECS))
                .await?;
        }

        if count as u64 > limit {
            Ok(Decision::Denied {
                retry_after_secs: WINDOW_SECS,
            })
        } else {
            Ok(Decision::Admitted)
        }
    }

    /// The caller's override if present and parseable, else the default.
    pub async fn effective_limit(&self, caller: &str) -> Result<u64, StoreError> {
        let value = self.store.get(&format!("rate_limit:{caller}")).await?;
        Ok(value
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.default_limit))
    }

    /// Set a per-caller override. Persists until replaced; no TTL.
    pub async fn set_limit(&self, caller: &str, limit: u64) -> Result<(), StoreError> {
        self.store
            .set(&format!("rate_limit:{caller}"), &limit.to_string(), None)
            .await
    }
}
