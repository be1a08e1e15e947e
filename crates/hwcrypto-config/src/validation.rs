// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Ensures values are within range and consistent with each other before a
//! registry is built from them.

use crate::{ConfigError, ConfigResult, DispatchConfig, MAX_POLL_INTERVAL_US};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    OutOfRange { field: String, value: u64, min: u64, max: u64 },
    InvertedWatermarks { start: usize, stop: usize },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(
                f,
                "{} = {} is outside valid range ({}-{})",
                field, value, min, max
            ),
            Self::InvertedWatermarks { start, stop } => write!(
                f,
                "reorder.backlog_start ({}) must be lower than reorder.backlog_stop ({})",
                start, stop
            ),
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Poll interval in 1..=1_000_000 microseconds
/// - Non-zero queue capacity and idle timeout
/// - Reorder watermarks with start strictly below stop
/// - A known log level
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every violation found
pub fn validate_config(config: &DispatchConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_polling(config, &mut errors);
    validate_capacities(config, &mut errors);
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_polling(config: &DispatchConfig, errors: &mut Vec<ConfigValidationError>) {
    let interval = config.polling.interval_us;
    if interval == 0 || interval > MAX_POLL_INTERVAL_US {
        errors.push(ConfigValidationError::OutOfRange {
            field: "polling.interval_us".to_string(),
            value: interval,
            min: 1,
            max: MAX_POLL_INTERVAL_US,
        });
    }
}

fn validate_capacities(config: &DispatchConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.queues.request_queue_length == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "queues.request_queue_length".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    let reorder = &config.reorder;
    if reorder.backlog_stop == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "reorder.backlog_stop".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if reorder.backlog_start >= reorder.backlog_stop {
        errors.push(ConfigValidationError::InvertedWatermarks {
            start: reorder.backlog_start,
            stop: reorder.backlog_stop,
        });
    }

    if config.bandwidth.idle_timeout_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "bandwidth.idle_timeout_ms".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
}

fn validate_logging(config: &DispatchConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("must be one of: {}", LOG_LEVELS.join(", ")),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&DispatchConfig::default()).is_ok());
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = DispatchConfig::default();
        config.polling.interval_us = MAX_POLL_INTERVAL_US + 1;

        let result = validate_config(&config);
        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("polling.interval_us"));
        } else {
            panic!("expected validation error");
        }

        config.polling.interval_us = MAX_POLL_INTERVAL_US;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_inverted_watermarks() {
        let mut config = DispatchConfig::default();
        config.reorder.backlog_start = 400;
        config.reorder.backlog_stop = 400;

        let result = validate_config(&config);
        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("backlog_start"));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_all_violations_are_reported() {
        let mut config = DispatchConfig::default();
        config.queues.request_queue_length = 0;
        config.bandwidth.idle_timeout_ms = 0;
        config.logging.level = "loud".to_string();

        let result = validate_config(&config);
        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("queues.request_queue_length"));
            assert!(msg.contains("bandwidth.idle_timeout_ms"));
            assert!(msg.contains("logging.level"));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_config_serializes_to_json() {
        let json = serde_json::to_value(DispatchConfig::default()).unwrap();
        assert_eq!(json["reorder"]["backlog_stop"], 400);
    }
}
