pub mod limiter;

pub use limiter::{LimiterStats, RateLimiter};
