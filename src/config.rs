use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub store: StoreSettings,
    pub idempotency: IdempotencySettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub url: String,
    pub connect_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_secs: 3,
        }
    }
}

/// Settings for the idempotency coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    /// Prefix shared by lock and response keys.
    pub key_prefix: String,
    /// TTL of the in-flight lock entry. A crashed execution frees its key
    /// after this long.
    pub lock_ttl_seconds: u64,
    /// Retention of cached responses for replay.
    pub response_ttl_seconds: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            key_prefix: "idem".to_string(),
            lock_ttl_seconds: 30,
            response_ttl_seconds: 600, // 10 minutes
        }
    }
}

/// Settings for the fixed-window rate limiter.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub key_prefix: String,
    /// Limit applied by `is_allowed_with_defaults`.
    pub default_limit: u32,
    /// Window applied by `is_allowed_with_defaults`.
    pub default_window_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            key_prefix: "rl".to_string(),
            default_limit: 20,
            default_window_seconds: 10,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }
}
