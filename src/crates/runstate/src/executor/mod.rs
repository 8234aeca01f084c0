//! Retry policy and the background retry/timeout supervisor

pub mod retry;
pub mod supervisor;

pub use retry::{BackoffStrategy, RetryConfig};
pub use supervisor::{RetrySupervisor, SweepReport};
