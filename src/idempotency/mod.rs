pub mod coordinator;

pub use coordinator::{CoordinatorMetrics, CoordinatorSnapshot, IdempotencyCoordinator};
