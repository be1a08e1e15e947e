// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, DispatchConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "hwcrypto.toml";
const CONFIG_PATH_ENV: &str = "HWCRYPTO_CONFIG_PATH";

/// Find the configuration file
///
/// Search order:
/// 1. `HWCRYPTO_CONFIG_PATH` environment variable
/// 2. Current working directory: `./hwcrypto.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet {} to specify a custom location.",
        CONFIG_FILE_NAME, search_list, CONFIG_PATH_ENV
    )))
}

/// Load configuration from a TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides keyed by dotted name (`polling.interval_us`)
///
/// # Errors
///
/// Returns error if the file is missing or contains invalid TOML. Range checks
/// are left to [`crate::validate_config`].
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<DispatchConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: DispatchConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `HWCRYPTO_POLL_INTERVAL_US` -> `polling.interval_us`
/// - `HWCRYPTO_POLL_MAX_RETRY` -> `polling.max_retry`
/// - `HWCRYPTO_QUEUE_LENGTH` -> `queues.request_queue_length`
/// - `HWCRYPTO_BACKLOG_STOP` -> `reorder.backlog_stop`
/// - `HWCRYPTO_BACKLOG_START` -> `reorder.backlog_start`
/// - `HWCRYPTO_IDLE_TIMEOUT_MS` -> `bandwidth.idle_timeout_ms`
/// - `HWCRYPTO_STATIC_ASSIGN` -> `assignment.static_assign`
/// - `HWCRYPTO_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut DispatchConfig) {
    let lookup = |key: &str| env::var(env_name(key)).ok();
    apply_overrides(config, lookup);
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - Map of dotted keys to values (e.g., `{"reorder.backlog_stop": "64"}`)
pub fn apply_cli_overrides(config: &mut DispatchConfig, cli_args: &HashMap<String, String>) {
    apply_overrides(config, |key| cli_args.get(key).cloned());
}

fn env_name(key: &str) -> &'static str {
    match key {
        "polling.interval_us" => "HWCRYPTO_POLL_INTERVAL_US",
        "polling.max_retry" => "HWCRYPTO_POLL_MAX_RETRY",
        "queues.request_queue_length" => "HWCRYPTO_QUEUE_LENGTH",
        "reorder.backlog_stop" => "HWCRYPTO_BACKLOG_STOP",
        "reorder.backlog_start" => "HWCRYPTO_BACKLOG_START",
        "bandwidth.idle_timeout_ms" => "HWCRYPTO_IDLE_TIMEOUT_MS",
        "assignment.static_assign" => "HWCRYPTO_STATIC_ASSIGN",
        "logging.level" => "HWCRYPTO_LOG_LEVEL",
        _ => "",
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

fn apply_overrides<F>(config: &mut DispatchConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("polling.interval_us").and_then(|v| v.parse().ok()) {
        config.polling.interval_us = v;
    }
    if let Some(v) = lookup("polling.max_retry").and_then(|v| v.parse().ok()) {
        config.polling.max_retry = v;
    }
    if let Some(v) = lookup("queues.request_queue_length").and_then(|v| v.parse().ok()) {
        config.queues.request_queue_length = v;
    }
    if let Some(v) = lookup("reorder.backlog_stop").and_then(|v| v.parse().ok()) {
        config.reorder.backlog_stop = v;
    }
    if let Some(v) = lookup("reorder.backlog_start").and_then(|v| v.parse().ok()) {
        config.reorder.backlog_start = v;
    }
    if let Some(v) = lookup("bandwidth.idle_timeout_ms").and_then(|v| v.parse().ok()) {
        config.bandwidth.idle_timeout_ms = v;
    }
    if let Some(v) = lookup("assignment.static_assign") {
        config.assignment.static_assign = parse_bool(&v);
    }
    if let Some(v) = lookup("logging.level") {
        config.logging.level = v;
    }
}
