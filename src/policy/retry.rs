//! # Retry Policy
//!
//! Decides whether a failed attempt is retried and how long to wait first.
//! Attempt numbers are 1-based and count executions, not retries: a policy
//! with `max_attempts = 3` runs the task at most three times.

use std::fmt;
use std::sync::Arc;

use super::backoff::{self, BackoffStrategy, NoBackoff};
use crate::config::RetryConfig;
use crate::error::TaskError;

/// Extra eligibility check applied on top of the attempt limit
pub type RetryPredicate = Arc<dyn Fn(&TaskError) -> bool + Send + Sync>;

/// Immutable retry decision function plus its backoff strategy
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn BackoffStrategy>,
    retry_on: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Sentinel policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Arc::new(NoBackoff),
            retry_on: None,
        }
    }

    /// Retry until `max_attempts` executions have failed
    ///
    /// A limit of zero is treated as one: the task always runs at least once.
    pub fn new(max_attempts: u32, backoff: impl BackoffStrategy + 'static) -> Self {
        Self::with_shared_backoff(max_attempts, Arc::new(backoff))
    }

    pub fn with_shared_backoff(max_attempts: u32, backoff: Arc<dyn BackoffStrategy>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retry_on: None,
        }
    }

    /// Retry every retryable failure with no attempt limit
    ///
    /// Combined with [`NoBackoff`] this spins as fast as the task fails.
    pub fn unbounded(backoff: impl BackoffStrategy + 'static) -> Self {
        Self::new(u32::MAX, backoff)
    }

    /// Only retry failures accepted by `predicate`
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::with_shared_backoff(config.max_attempts, backoff::from_config(&config.backoff))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &dyn BackoffStrategy {
        self.backoff.as_ref()
    }

    /// Whether attempt number `attempt` (1-based), which failed with `error`,
    /// should be followed by another attempt
    pub fn should_retry(&self, attempt: u32, error: &TaskError) -> bool {
        attempt < self.max_attempts
            && error.is_retryable()
            && self.retry_on.as_ref().map_or(true, |accepts| accepts(error))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}
