pub mod memory;
pub mod redis;
pub mod unavailable;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;
pub use self::unavailable::UnavailableStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreSettings;
use crate::error::Result;

/// Contract the coordination primitives require from the backing store.
///
/// `increment_window` is the one operation that must be atomic server-side:
/// two concurrent first callers of a new window must not both observe "no
/// counter" and both set a TTL. How atomicity is achieved (Lua script,
/// transaction, single mutex) is an adapter concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically creates `key` with `value` and a TTL. Returns `true` iff
    /// this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool>;

    /// Unconditionally writes `key` with a TTL.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increments the fixed-window counter under `key` and returns
    /// the post-increment count. The first increment of a window resets the
    /// count to 1 with a fresh TTL of `window_seconds`; later increments
    /// leave the TTL untouched.
    async fn increment_window(&self, key: &str, limit: u32, window_seconds: u64) -> Result<u64>;
}

/// Connects to the configured store, falling back to [`UnavailableStore`]
/// when it cannot be reached at startup.
///
/// The fallback keeps the failure policy in one place: every call on it fails
/// with `StoreUnavailable` and each caller applies its own degrade rule
/// (rate limiting fails open, replay lookups fall through, lock acquisition
/// surfaces the outage).
pub async fn connect(settings: &StoreSettings) -> Arc<dyn KeyValueStore> {
    match RedisStore::connect(settings).await {
        Ok(store) => {
            tracing::info!(url = %settings.url, "connected to key-value store");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                url = %settings.url,
                "key-value store unreachable at startup, running degraded: {}",
                e
            );
            crate::observability::get_metrics().record_store_fallback();
            Arc::new(UnavailableStore)
        }
    }
}
