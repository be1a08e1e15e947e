// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `hwcrypto.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the poll controller interval (one second).
pub const MAX_POLL_INTERVAL_US: u64 = 1_000_000;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub polling: PollingConfig,
    pub queues: QueueConfig,
    pub reorder: ReorderConfig,
    pub bandwidth: BandwidthConfig,
    pub assignment: AssignmentConfig,
    pub logging: LoggingConfig,
}

/// Poll controller tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Period between completion polls while work is outstanding
    pub interval_us: u64,
    /// Consecutive idle ticks tolerated before a controller goes to sleep
    pub max_retry: u32,
    /// CPU label of the controller used when an engine names none
    pub default_cpu: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_us: 350,
            max_retry: 100,
            default_cpu: 1,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us.min(MAX_POLL_INTERVAL_US))
    }
}

/// Pending and overflow queue capacity
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub request_queue_length: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_queue_length: 768,
        }
    }
}

/// Ready-list watermarks for the response reorder pipeline
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReorderConfig {
    /// Ready depth at which new dispatch stops
    pub backlog_stop: usize,
    /// Ready depth below which dispatch resumes
    pub backlog_start: usize,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            backlog_stop: 400,
            backlog_start: 200,
        }
    }
}

/// Bus bandwidth and clock management
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BandwidthConfig {
    /// Reaper period; an engine idle for a full period drops to low bandwidth
    pub idle_timeout_ms: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1000,
        }
    }
}

impl BandwidthConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Engine assignment policy for new transforms
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Pin every new transform to the next engine in round-robin order.
    /// When false transforms start unpinned and use the shared overflow queue.
    pub static_assign: bool,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            static_assign: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when no per-crate debug flag applies
    pub level: String,
    /// Base directory for rolling log files
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
    /// Write per-crate JSON files in addition to the console
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
            file_output: false,
        }
    }
}
