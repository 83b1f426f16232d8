use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::RateLimitSettings;
use crate::observability::get_metrics;
use crate::store::KeyValueStore;

/// Counters for rate-limit decisions.
#[derive(Debug, Default)]
pub struct LimiterStats {
    pub allowed: AtomicU64,
    pub rejected: AtomicU64,
    pub errors: AtomicU64,
}

impl LimiterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejection_rate(&self) -> f64 {
        let allowed = self.allowed.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let total = allowed + rejected;
        if total == 0 {
            0.0
        } else {
            rejected as f64 / total as f64
        }
    }

    pub fn get_allowed(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    pub fn get_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn get_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Fixed-window rate limiter over the shared store.
///
/// Admission decisions within one window are totally ordered by the store's
/// atomic increment; the window resets when the counter key's TTL expires.
/// The limiter is protective rather than correctness-critical, so any store
/// failure fails open.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    settings: RateLimitSettings,
    stats: Arc<LimiterStats>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: RateLimitSettings) -> Self {
        Self {
            store,
            settings,
            stats: Arc::new(LimiterStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<LimiterStats> {
        Arc::clone(&self.stats)
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}:{}", self.settings.key_prefix, key)
    }

    /// Returns `true` when the call is admitted for the current window. The
    /// limit-th call of a window is still allowed; the counter advances even
    /// for rejected calls, so the stored count reflects attempts, not
    /// admissions.
    pub async fn is_allowed(&self, key: &str, limit: u32, window_seconds: u64) -> bool {
        let counter_key = self.counter_key(key);

        match self
            .store
            .increment_window(&counter_key, limit, window_seconds)
            .await
        {
            Ok(count) => {
                let allowed = count <= u64::from(limit);
                if allowed {
                    self.stats.record_allowed();
                } else {
                    tracing::warn!(
                        key = %key,
                        count = count,
                        limit = limit,
                        "rate limit exceeded"
                    );
                    self.stats.record_rejected();
                }
                get_metrics().record_rate_limit_decision(allowed);
                allowed
            }
            Err(e) => {
                // Fail open: a down store must not amplify into an outage.
                tracing::error!(key = %key, "rate limit increment failed, allowing call: {}", e);
                self.stats.record_error();
                get_metrics().record_rate_limit_decision(true);
                true
            }
        }
    }

    /// Checks admission with the configured default limit and window.
    pub async fn is_allowed_with_defaults(&self, key: &str) -> bool {
        self.is_allowed(
            key,
            self.settings.default_limit,
            self.settings.default_window_seconds,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::MockKeyValueStore;

    fn limiter(mock: MockKeyValueStore) -> RateLimiter {
        RateLimiter::new(Arc::new(mock), RateLimitSettings::default())
    }

    #[tokio::test]
    async fn test_count_at_limit_is_allowed() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_increment_window().returning(|_, _, _| Ok(10));

        let limiter = limiter(mock);
        assert!(limiter.is_allowed("client-1", 10, 60).await);
        assert_eq!(limiter.stats().get_allowed(), 1);
    }

    #[tokio::test]
    async fn test_count_over_limit_is_rejected() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_increment_window().returning(|_, _, _| Ok(11));

        let limiter = limiter(mock);
        assert!(!limiter.is_allowed("client-1", 10, 60).await);
        assert_eq!(limiter.stats().get_rejected(), 1);
    }

    #[tokio::test]
    async fn test_store_error_fails_open() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_increment_window().returning(|_, _, _| {
            Err(AppError::StoreUnavailable(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "store offline",
            ))))
        });

        let limiter = limiter(mock);
        assert!(limiter.is_allowed("client-1", 10, 60).await);
        assert_eq!(limiter.stats().get_errors(), 1);
    }

    #[tokio::test]
    async fn test_counter_key_carries_prefix() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_increment_window()
            .withf(|key, _, _| key == "rl:10.0.0.1:/orders")
            .returning(|_, _, _| Ok(1));

        let limiter = limiter(mock);
        assert!(limiter.is_allowed("10.0.0.1:/orders", 10, 60).await);
    }

    #[tokio::test]
    async fn test_defaults_entry_point_uses_configured_values() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_increment_window()
            .withf(|_, limit, window| *limit == 20 && *window == 10)
            .returning(|_, _, _| Ok(21));

        let limiter = limiter(mock);
        assert!(!limiter.is_allowed_with_defaults("client-1").await);
    }

    #[test]
    fn test_rejection_rate() {
        let stats = LimiterStats::new();
        stats.record_allowed();
        stats.record_allowed();
        stats.record_allowed();
        stats.record_rejected();

        assert!((stats.rejection_rate() - 0.25).abs() < f64::EPSILON);
    }
}
