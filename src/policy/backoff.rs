//! # Backoff Strategies
//!
//! Pure delay computation for retry waits. Attempt numbers are 1-based: the
//! delay returned for attempt `n` is the wait between attempt `n` failing and
//! attempt `n + 1` starting.
//!
//! | Strategy               | Delay for attempt `n`                     |
//! |------------------------|-------------------------------------------|
//! | [`NoBackoff`]          | `0`                                       |
//! | [`FixedBackoff`]       | `delay`                                   |
//! | [`LinearBackoff`]      | `step × n`, capped at `max`               |
//! | [`ExponentialBackoff`] | `base × multiplier^(n-1)`, capped at `max`|

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackoffConfig, BackoffKind};

/// Maps a 1-based attempt number to a non-negative delay
///
/// Implementations must be deterministic and must not consult wall-clock
/// time or shared counters.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    fn compute_delay(&self, attempt: u32) -> Duration;
}

/// Sentinel strategy that never waits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBackoff;

impl BackoffStrategy for NoBackoff {
    fn compute_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Same delay after every failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for FixedBackoff {
    fn compute_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Delay grows by `step` with every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub step: Duration,
    pub max: Duration,
}

impl LinearBackoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self { step, max }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn compute_delay(&self, attempt: u32) -> Duration {
        self.step
            .checked_mul(attempt.max(1))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Delay multiplies by `multiplier` with every attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay after the first failed attempt
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let unclamped = self.base.as_secs_f64() * self.multiplier.powi(exponent);

        if !unclamped.is_finite() || unclamped < 0.0 || unclamped > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        }
    }
}

/// Build the strategy described by a [`BackoffConfig`]
pub fn from_config(config: &BackoffConfig) -> Arc<dyn BackoffStrategy> {
    let base = Duration::from_millis(config.base_delay_ms);
    let max = Duration::from_millis(config.max_delay_ms);

    match config.kind {
        BackoffKind::None => Arc::new(NoBackoff),
        BackoffKind::Fixed => Arc::new(FixedBackoff::new(base)),
        BackoffKind::Linear => Arc::new(LinearBackoff::new(base, max)),
        BackoffKind::Exponential => {
            Arc::new(ExponentialBackoff::new(base, config.multiplier, max))
        }
    }
}
