//! Configuration management for modelgate
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MODELGATE__<section>__<key>`
//!
//! Examples:
//! - `MODELGATE__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MODELGATE__RATE_LIMIT__IP_MAX=50`
//! - `MODELGATE__CACHE__DEFAULT_TTL_SECS=120`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/modelgate.toml`.
//! This can be overridden using the `MODELGATE_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    CacheConfig, Config, FailoverSettings, RateLimitConfig, RetentionConfig, ServerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation
    /// fails (zero budgets, empty alternate lists, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:8088"

[rate_limit]
ip_max = 20
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:8088");
        assert_eq!(config.rate_limit.ip_max, 20);
    }

    #[test]
    fn test_validation_catches_zero_window() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[rate_limit]\nwindow_secs = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::RateWindowZero)
        ));
    }
}
