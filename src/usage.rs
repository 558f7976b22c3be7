//! Best-effort token usage accounting, off the request's critical path.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{CounterStore, StoreError};

/// Hourly buckets are kept for 7 days from last use.
const HOURLY_RETENTION: Duration = Duration::from_secs(86400 * 7);

#[derive(Clone)]
pub struct UsageAccountant {
    store: Arc<dyn CounterStore>,
}

impl UsageAccountant {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Record token consumption for `caller` as deferred work. Never blocks
    /// the response and never surfaces an error; store failures are logged
    /// and dropped.
    pub fn record(&self, caller: &str, total_tokens: u64, now_secs: u64) {
        let accountant = self.clone();
        let caller = caller.to_string();
        tokio::spawn(async move {
            if let Err(e) = accountant.record_now(&caller, total_tokens, now_secs).await {
                warn!("failed to record usage for {caller}: {e}");
            }
        });
    }

    /// Apply the increments synchronously. Split out so tests can drive the
    /// accounting without racing the spawned task.
    pub async fn record_now(
        &self,
        caller: &str,
        total_tokens: u64,
        now_secs: u64,
    ) -> Result<(), StoreError> {
        let hour_id = now_secs / 3600;
        let hourly_key = format!("usage:{caller}:{hour_id}");
        self.store.incr_by(&hourly_key, total_tokens as i64).await?;
        // Unlike the rate window, retention is refreshed on every touch:
        // rolling 7 days from last use.
        self.store.expire(&hourly_key, HOURLY_RETENTION).await?;

        self.store
            .incr_by(&format!("total_usage:{caller}"), total_tokens as i64)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NOW: u64 = 1_700_000_000;

    #[tokio::test]
    async fn test_record_updates_hourly_and_cumulative() {
        let store = Arc::new(MemoryStore::new());
        let accountant = UsageAccountant::new(store.clone());

        accountant.record_now("k1", 5, NOW).await.unwrap();
        accountant.record_now("k1", 7, NOW).await.unwrap();

        let hourly_key = format!("usage:k1:{}", NOW / 3600);
        assert_eq!(store.get(&hourly_key).await.unwrap(), Some("12".to_string()));
        assert_eq!(
            store.get("total_usage:k1").await.unwrap(),
            Some("12".to_string())
        );
    }

    #[tokio::test]
    async fn test_hours_bucket_separately_cumulative_does_not() {
        let store = Arc::new(MemoryStore::new());
        let accountant = UsageAccountant::new(store.clone());

        accountant.record_now("k2", 10, NOW).await.unwrap();
        accountant.record_now("k2", 20, NOW + 3600).await.unwrap();

        let first = format!("usage:k2:{}", NOW / 3600);
        let second = format!("usage:k2:{}", NOW / 3600 + 1);
        assert_eq!(store.get(&first).await.unwrap(), Some("10".to_string()));
        assert_eq!(store.get(&second).await.unwrap(), Some("20".to_string()));
        assert_eq!(
            store.get("total_usage:k2").await.unwrap(),
            Some("30".to_string())
        );
    }

    #[tokio::test]
    async fn test_deferred_record_lands() {
        let store = Arc::new(MemoryStore::new());
        let accountant = UsageAccountant::new(store.clone());

        accountant.record("k3", 42, NOW);
        // Give the spawned task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            store.get("total_usage:k3").await.unwrap(),
            Some("42".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_error_is_swallowed() {
        // A poisoned key makes incr_by fail; record must not panic and the
        // cumulative counter stays untouched.
        let store = Arc::new(MemoryStore::new());
        store
            .set(&format!("usage:k4:{}", NOW / 3600), "junk", None)
            .await
            .unwrap();
        let accountant = UsageAccountant::new(store.clone());

        assert!(accountant.record_now("k4", 5, NOW).await.is_err());
        accountant.record("k4", 5, NOW);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("total_usage:k4").await.unwrap(), None);
    }
}
