use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Application error taxonomy.
///
/// Store unavailability is handled differently per call site: the replay
/// lookup and the rate-limit increment degrade gracefully, while lock
/// acquisition surfaces the outage (masking it would break the at-most-one
/// guarantee).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("key-value store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    #[error("an execution with this idempotency key is already in progress")]
    ConcurrentExecution,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::ConcurrentExecution)
    }
}
