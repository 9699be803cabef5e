//! # Execution Policies
//!
//! Immutable value types that decide how a task is retried and bounded:
//!
//! - [`BackoffStrategy`] - pure `attempt -> delay` function
//! - [`RetryPolicy`] - `(attempt, error) -> retry?` plus its backoff
//! - [`TimeoutPolicy`] - budget for an entire retry loop
//!
//! None of them hold mutable state, so a single policy instance can be shared
//! by any number of concurrent executions.

pub mod backoff;
pub mod retry;
pub mod timeout;

pub use backoff::{BackoffStrategy, ExponentialBackoff, FixedBackoff, LinearBackoff, NoBackoff};
pub use retry::{RetryPolicy, RetryPredicate};
pub use timeout::TimeoutPolicy;
