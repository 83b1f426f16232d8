use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::Result;
use crate::store::KeyValueStore;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Single-process store backend for tests and local development.
///
/// One mutex spans each operation, which satisfies the same atomicity
/// contract the Redis adapter gets from its server-side script. Not suitable
/// for multi-instance deployments: the whole point of the coordination
/// primitives is that the store, not process memory, is the shared state.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let live = entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false);
        if live {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn increment_window(&self, key: &str, _limit: u32, window_seconds: u64) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let current = entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.value.parse::<u64>().ok())
            .unwrap_or(0);

        let next = current + 1;
        if next == 1 {
            // First increment of the window owns the TTL.
            entries.insert(
                key.to_string(),
                Entry {
                    value: next.to_string(),
                    expires_at: now + Duration::from_secs(window_seconds),
                },
            );
        } else if let Some(entry) = entries.get_mut(key) {
            entry.value = next.to_string();
        }

        Ok(next)
    }
}
