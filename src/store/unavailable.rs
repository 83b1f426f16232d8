use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::store::KeyValueStore;

/// Stand-in selected at construction time when the real store cannot be
/// reached. Every call fails with `StoreUnavailable`, leaving the degrade
/// decision to each call site instead of scattering null checks around.
pub struct UnavailableStore;

fn offline() -> AppError {
    AppError::StoreUnavailable(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "key-value store offline",
    )))
}

#[async_trait]
impl KeyValueStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(offline())
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<bool> {
        Err(offline())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<()> {
        Err(offline())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(offline())
    }

    async fn increment_window(&self, _key: &str, _limit: u32, _window_seconds: u64) -> Result<u64> {
        Err(offline())
    }
}
