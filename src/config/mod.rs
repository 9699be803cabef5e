//! # Configuration
//!
//! Serde-backed configuration for retry, timeout, parallel fan-out and
//! transactional scopes. Every section has defaults, so an empty file (or no
//! file at all) yields a usable configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskrun_core::config::ConfigManager;
//! use taskrun_core::RetryPolicy;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/taskrun.yaml")?;
//! let retry = RetryPolicy::from_config(&manager.config().retry);
//! # Ok(())
//! # }
//! ```
//!
//! ## Example file
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//!   backoff:
//!     kind: exponential
//!     base_delay_ms: 100
//!     max_delay_ms: 5000
//!     multiplier: 2.0
//! timeout:
//!   timeout_ms: 30000
//! parallel:
//!   max_concurrency: 8
//!   timeout_ms: 60000
//! transaction:
//!   isolation_level: read_committed
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub parallel: ParallelConfig,
    pub transaction: TransactionConfig,
}

impl CoreConfig {
    /// Reject values that would produce nonsensical policies
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        let backoff = &self.retry.backoff;
        if !backoff.multiplier.is_finite() || backoff.multiplier < 0.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff.multiplier",
                backoff.multiplier.to_string(),
                "multiplier must be a finite, non-negative number",
            ));
        }
        if backoff.max_delay_ms < backoff.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff.max_delay_ms",
                backoff.max_delay_ms.to_string(),
                format!(
                    "max delay must not be lower than base delay ({}ms)",
                    backoff.base_delay_ms
                ),
            ));
        }

        if self.parallel.max_concurrency == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "parallel.max_concurrency",
                "0",
                "concurrency limit must be positive when set",
            ));
        }

        Ok(())
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total executions allowed, first attempt included
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Backoff configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::None,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    None,
    Fixed,
    Linear,
    Exponential,
}

/// Timeout configuration; absent or non-positive means no timeout
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub timeout_ms: Option<i64>,
}

/// Parallel fan-out configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Upper bound on tasks running at once; unbounded when absent
    pub max_concurrency: Option<usize>,
    /// Overall join timeout; absent or non-positive means wait forever
    pub timeout_ms: Option<i64>,
}

/// Transactional scope configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Isolation level name such as `read_committed` or `SERIALIZABLE`.
    /// Unknown names fall back to the connection default.
    pub isolation_level: Option<String>,
}
