// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hwcrypto Configuration
//!
//! Settings for the crypto dispatch core, read from `hwcrypto.toml` and
//! then overridden by `HWCRYPTO_*` variables and command-line values.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hwcrypto_config::{load_config, validate_config};
//!
//! let config = load_config(None, None).expect("Failed to load config");
//! validate_config(&config).expect("Invalid config");
//!
//! println!("Poll interval: {} us", config.polling.interval_us);
//! println!("Queue length: {}", config.queues.request_queue_length);
//! ```
//!
//! Every value has a default matching the hardware driver's historical
//! tuning, so a missing section is never an error.

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{apply_cli_overrides, apply_environment_overrides, find_config_file, load_config};
pub use types::*;
pub use validation::{validate_config, ConfigValidationError};

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_driver_tuning() {
        let config = DispatchConfig::default();
        assert_eq!(config.polling.interval_us, 350);
        assert_eq!(config.polling.max_retry, 100);
        assert_eq!(config.polling.default_cpu, 1);
        assert_eq!(config.queues.request_queue_length, 768);
        assert_eq!(config.reorder.backlog_stop, 400);
        assert_eq!(config.reorder.backlog_start, 200);
        assert_eq!(config.bandwidth.idle_timeout_ms, 1000);
        assert!(config.assignment.static_assign);
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: ConfigError = toml::from_str::<DispatchConfig>("[polling\n").unwrap_err().into();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
