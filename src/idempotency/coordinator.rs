use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, mask_key, LatencyTimer};
use crate::store::KeyValueStore;

/// Counters for idempotency handling.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub total_calls: AtomicU64,
    pub replayed: AtomicU64,
    pub executed: AtomicU64,
    pub conflicts: AtomicU64,
    pub failed_operations: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_rate(&self) -> f64 {
        let total = self.total_calls.load(Ordering::Relaxed);
        let replayed = self.replayed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            replayed as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub total_calls: u64,
    pub replayed: u64,
    pub executed: u64,
    pub conflicts: u64,
    pub failed_operations: u64,
}

/// Releases the idempotency lock exactly once per acquisition.
///
/// Normal exit paths call `release` and await the delete. If the owning
/// future is dropped mid-operation (caller cancelled), `Drop` schedules the
/// delete on the runtime so the key does not stay wedged until TTL expiry.
struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    armed: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn KeyValueStore>, key: String) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.store.delete(&self.key).await {
            tracing::warn!(key = %self.key, "failed to release idempotency lock: {}", e);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.store);
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                if let Err(e) = store.delete(&key).await {
                    tracing::warn!(key = %key, "failed to release idempotency lock on cancel: {}", e);
                }
            });
        }
    }
}

/// Makes a side-effecting operation execute at most once per idempotency key
/// and replays the original result to duplicate callers.
///
/// The response cache is consulted before any lock interaction so the common
/// replay path never contends for the lock. The lock TTL is a safety valve
/// for crashed executions, not a lease: an operation that outlives it can be
/// overlapped by a second caller.
pub struct IdempotencyCoordinator {
    store: Arc<dyn KeyValueStore>,
    settings: IdempotencySettings,
    metrics: Arc<CoordinatorMetrics>,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: IdempotencySettings) -> Self {
        Self {
            store,
            settings,
            metrics: Arc::new(CoordinatorMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn lock_key(&self, idempotency_key: &str) -> String {
        format!("{}:lock:{}", self.settings.key_prefix, idempotency_key)
    }

    pub fn response_key(&self, idempotency_key: &str) -> String {
        format!("{}:resp:{}", self.settings.key_prefix, idempotency_key)
    }

    /// Runs `operation` under the idempotency protocol for `idempotency_key`.
    ///
    /// Returns the cached result when a previous execution with this key
    /// completed within the response TTL, `ConcurrentExecution` when another
    /// execution currently holds the lock, `StoreUnavailable` when the lock
    /// cannot be acquired because the store is down, and otherwise the
    /// operation's own outcome. The caller is expected to have validated that
    /// the key is non-empty.
    pub async fn execute<T, F, Fut>(&self, idempotency_key: &str, operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.metrics.record_call();

        let response_key = self.response_key(idempotency_key);
        if let Some(cached) = self.lookup_cached(&response_key).await {
            tracing::info!(
                key = %mask_key(idempotency_key),
                "replaying cached response for idempotency key"
            );
            self.metrics.record_replay();
            get_metrics().record_replay_hit();
            return Ok(cached);
        }

        // No degrade here: granting the lock while the store is down would
        // break the at-most-one guarantee, so store errors surface as-is.
        let lock_key = self.lock_key(idempotency_key);
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .store
            .set_if_absent(&lock_key, &token, self.settings.lock_ttl_seconds)
            .await?;

        if !acquired {
            tracing::warn!(
                key = %mask_key(idempotency_key),
                "another execution with this idempotency key is in progress"
            );
            self.metrics.record_conflict();
            get_metrics().record_lock_conflict();
            return Err(AppError::ConcurrentExecution);
        }

        let guard = LockGuard::new(Arc::clone(&self.store), lock_key);
        let timer = LatencyTimer::new();

        match operation().await {
            Ok(value) => {
                self.cache_response(&response_key, &value).await;
                guard.release().await;
                self.metrics.record_executed();
                get_metrics().record_execution(true, timer.elapsed_ms());
                Ok(value)
            }
            Err(e) => {
                // No response is cached for a failed attempt, so a retry with
                // the same key re-executes.
                guard.release().await;
                self.metrics.record_failed();
                get_metrics().record_execution(false, timer.elapsed_ms());
                Err(e)
            }
        }
    }

    /// Replay lookup. Store unavailability and corrupt cached values are both
    /// treated as "no cached response": availability of the operation takes
    /// priority over caching when the store degrades.
    async fn lookup_cached<T: DeserializeOwned>(&self, response_key: &str) -> Option<T> {
        match self.store.get(response_key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(
                        key = %response_key,
                        "cached response is not deserializable, re-executing: {}",
                        e
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    key = %response_key,
                    "response lookup failed, proceeding without replay cache: {}",
                    e
                );
                None
            }
        }
    }

    /// Caches the serialized result for replay. A failed write is logged and
    /// swallowed: the operation already succeeded and its result must reach
    /// the caller.
    async fn cache_response<T: Serialize>(&self, response_key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(key = %response_key, "failed to serialize response: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .store
            .set(response_key, &json, self.settings.response_ttl_seconds)
            .await
        {
            tracing::error!(key = %response_key, "failed to cache response: {}", e);
        }
    }
}
