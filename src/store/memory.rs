use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CounterStore, StoreError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory counter store with lazy TTL expiry.
///
/// Matches the Redis backend's observable semantics for the operations the
/// gateway uses. Expired entries are dropped on next access to their key.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the parsed integer value of `key` by `amount`, creating it
    /// at `amount` when absent or expired. Non-numeric values error, like
    /// Redis INCR on a non-integer string.
    fn incr_locked(
        data: &mut HashMap<String, Entry>,
        key: &str,
        amount: i64,
    ) -> Result<i64, StoreError> {
        match data.get_mut(key) {
            Some(entry) if !entry.expired() => {
                let current: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError(format!("value at {key} is not an integer")))?;
                let next = current + amount;
                entry.value = next.to_string();
                Ok(next)
            }
            _ => {
                data.insert(
                    key.to_string(),
                    Entry {
                        value: amount.to_string(),
                        expires_at: None,
                    },
                );
                Ok(amount)
            }
        }
    }

    #[cfg(test)]
    pub fn live_entry_count(&self) -> usize {
        let data = self.data.lock().unwrap();
        data.values().filter(|e| !e.expired()).count()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut data = self.data.lock().unwrap();
        match data.get(key) {
            Some(entry) if entry.expired() => {
                data.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut data = self.data.lock().unwrap();
        Self::incr_locked(&mut data, key, 1)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let mut data = self.data.lock().unwrap();
        Self::incr_locked(&mut data, key, amount)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        if let Some(entry) = data.get_mut(key)
            && !entry.expired()
        {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
