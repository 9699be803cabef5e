//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources are layered
//! in order: struct defaults, an optional YAML/TOML/JSON file, then
//! environment variables such as `TASKRUN__RETRY__MAX_ATTEMPTS=5`.

use super::error::ConfigResult;
use super::CoreConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix for environment overrides; nested keys are joined with `__`
pub const ENV_PREFIX: &str = "TASKRUN";

/// Loaded, validated configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CoreConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load from environment variables only
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_sources(None, ENV_PREFIX)
    }

    /// Load from a file, then apply environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_sources(Some(path.as_ref()), ENV_PREFIX)
    }

    /// Load from an optional file plus environment variables with a custom
    /// prefix. Useful for tests that must not see the process-wide overrides.
    pub fn load_from_sources(
        path: Option<&Path>,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        debug!(
            environment = %environment,
            file = ?path.map(Path::display),
            env_prefix = env_prefix,
            "Loading configuration"
        );

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: CoreConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            max_attempts = config.retry.max_attempts,
            timeout_ms = ?config.timeout.timeout_ms,
            max_concurrency = ?config.parallel.max_concurrency,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source: path.map(Path::to_path_buf),
        }))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: CoreConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Current environment from `TASKRUN_ENV` or `APP_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var("TASKRUN_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
