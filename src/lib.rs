pub mod config;
pub mod error;
pub mod idempotency;
pub mod observability;
pub mod ratelimit;
pub mod store;

pub use config::Settings;
pub use error::{AppError, Result};
pub use idempotency::IdempotencyCoordinator;
pub use ratelimit::RateLimiter;
pub use store::KeyValueStore;
