use std::sync::Arc;

use coordination_engine::config::{IdempotencySettings, RateLimitSettings};
use coordination_engine::store::{InMemoryStore, KeyValueStore};

pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(InMemoryStore::new())
}

#[allow(dead_code)]
pub fn idempotency_settings() -> IdempotencySettings {
    IdempotencySettings::default()
}

#[allow(dead_code)]
pub fn rate_limit_settings(limit: u32, window_seconds: u64) -> RateLimitSettings {
    RateLimitSettings {
        key_prefix: "rl".to_string(),
        default_limit: limit,
        default_window_seconds: window_seconds,
    }
}
