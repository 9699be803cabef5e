//! # Structured Logging Module
//!
//! Environment-aware structured logging for retry loops, parallel fan-outs and
//! transactional scopes.
//!
//! | Variable             | Effect                                              |
//! |----------------------|-----------------------------------------------------|
//! | `TASKRUN_LOG_LEVEL`  | Explicit filter directive, e.g. `taskrun_core=trace` |
//! | `TASKRUN_ENV`        | `production` logs at info, everything else at debug |
//! | `TASKRUN_LOG_FORMAT` | `json` switches to JSON lines                       |

use std::env;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format for the console layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once, and safe to call when the host application
/// already installed a global subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let log_level = get_log_level(&environment);
        let format = get_log_format();

        let layer = match format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
            return;
        }

        tracing::info!(
            environment = %environment,
            level = %log_level,
            format = ?format,
            "Structured logging initialized"
        );
    });
}

/// Filter directive from `TASKRUN_LOG_LEVEL`, else derived from the environment
fn get_log_level(environment: &str) -> String {
    match env::var("TASKRUN_LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => level,
        _ => default_level(environment).to_string(),
    }
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn get_log_format() -> LogFormat {
    match env::var("TASKRUN_LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}
