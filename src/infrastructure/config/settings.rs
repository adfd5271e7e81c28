//! Root configuration loading and validation.

use std::path::Path;

use serde::Deserialize;

use super::cluster::{ClusterConfig, ReadinessConfig};
use super::logging::LoggingConfig;
use super::pool::PoolConfig;
use super::retry::RetryConfig;
use crate::error::{ConfigError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl Config {
    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file can't be read, doesn't parse or
    /// holds an invalid value.
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the content doesn't parse or holds an
    /// invalid value.
    #[allow(clippy::result_large_err)]
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        if self.pool.max_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_pool_size",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.pool.parallelism == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "parallelism",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.pool.parallelism_factor == 0 {
            return Err(ConfigError::InvalidValue {
                field: "parallelism_factor",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "backoff_multiplier",
                reason: "must be 1.0 or greater".to_string(),
            }
            .into());
        }
        if self.retry.max_delay_ms < self.retry.retry_after_ms {
            return Err(ConfigError::InvalidValue {
                field: "max_delay_ms",
                reason: "must be at least retry_after_ms".to_string(),
            }
            .into());
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.cluster.namespace.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "namespace" }.into());
        }
        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}
