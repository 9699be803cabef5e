//! # Timeout Policy
//!
//! Budget for the *entire* retry loop of one execution, backoff waits
//! included. It is not a per-attempt limit.

use std::time::Duration;

use crate::config::TimeoutConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Run inline on the caller's task with no deadline
    #[default]
    None,
    /// Run on a worker and give up once the budget elapses; a zero budget
    /// behaves like [`TimeoutPolicy::None`]
    Bounded(Duration),
}

impl TimeoutPolicy {
    /// Zero yields [`TimeoutPolicy::None`]
    pub fn from_duration(budget: Duration) -> Self {
        if budget.is_zero() {
            TimeoutPolicy::None
        } else {
            TimeoutPolicy::Bounded(budget)
        }
    }

    /// Non-positive values yield [`TimeoutPolicy::None`]
    pub fn from_millis(millis: i64) -> Self {
        match u64::try_from(millis) {
            Ok(millis) => Self::from_duration(Duration::from_millis(millis)),
            Err(_) => TimeoutPolicy::None,
        }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        config
            .timeout_ms
            .map_or(TimeoutPolicy::None, Self::from_millis)
    }

    /// The effective budget; `None` when unbounded or zero
    pub fn budget(&self) -> Option<Duration> {
        match self {
            TimeoutPolicy::Bounded(budget) if !budget.is_zero() => Some(*budget),
            _ => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.budget().is_some()
    }
}
