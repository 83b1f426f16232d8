use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::config::StoreSettings;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use crate::store::KeyValueStore;

/// Fixed-window counter script, executed server-side so the read, the
/// increment, and the conditional TTL set are one indivisible step. ARGV[1]
/// carries the limit for parity with the historical script; the decision
/// itself is made client-side from the returned count.
const WINDOW_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
current = current + 1
if current == 1 then
  redis.call('SETEX', KEYS[1], tonumber(ARGV[2]), current)
else
  redis.call('INCRBY', KEYS[1], 1)
end
return current
"#;

/// Redis adapter for the key-value store contract.
pub struct RedisStore {
    client: redis::Client,
    window_script: redis::Script,
}

impl RedisStore {
    /// Opens a client and verifies connectivity with a PING before handing
    /// the store out. Callers use the failure to select the unavailable
    /// variant instead.
    pub async fn connect(settings: &StoreSettings) -> Result<Self> {
        let client = redis::Client::open(settings.url.as_str())?;

        let connect = client.get_multiplexed_async_connection();
        let mut conn = tokio::time::timeout(
            Duration::from_secs(settings.connect_timeout_secs),
            connect,
        )
        .await
        .map_err(|_| {
            AppError::StoreUnavailable(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection attempt timed out",
            )))
        })??;

        let _: () = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self {
            client,
            window_script: redis::Script::new(WINDOW_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = conn.get(key).await;
        get_metrics().record_store_operation("get", timer.elapsed_ms(), result.is_ok());
        Ok(result?)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = conn
            .set_options(
                key,
                value,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl_seconds as usize)),
            )
            .await;
        get_metrics().record_store_operation("set_if_absent", timer.elapsed_ms(), result.is_ok());

        // SET NX replies nil when the key already existed.
        Ok(result?.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn.set_ex(key, value, ttl_seconds).await;
        get_metrics().record_store_operation("set", timer.elapsed_ms(), result.is_ok());
        Ok(result?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = conn.del(key).await;
        get_metrics().record_store_operation("delete", timer.elapsed_ms(), result.is_ok());
        result?;
        Ok(())
    }

    async fn increment_window(&self, key: &str, limit: u32, window_seconds: u64) -> Result<u64> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<u64> = self
            .window_script
            .key(key)
            .arg(limit)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await;
        get_metrics().record_store_operation("increment_window", timer.elapsed_ms(), result.is_ok());
        Ok(result?)
    }
}
