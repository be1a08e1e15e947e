// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output is always available. With the `file-logging` feature each
//! run also gets its own folder of per-crate JSON logs with retention.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Install a console-only subscriber.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place and return an error.
pub fn init_console_logging(debug_flags: &CrateDebugFlags, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(debug_flags.to_filter_string_with_default(default_level))
        .context("Invalid log filter")?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_filter(filter);

    Registry::default()
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")
}

/// Logging initialization result
///
/// Keeps the non-blocking writers alive; logs are flushed when it is dropped.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: PathBuf,
}

impl LoggingGuard {
    /// Get the log directory path of this run
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Initialize logging with file output and console output
///
/// Creates a timestamped folder structure:
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       ├── hwcrypto-dispatch.log
///       ├── hwcrypto-hal.log
///       └── hwcrypto.log (combined)
/// ```
///
/// # Arguments
/// * `debug_flags` - Per-crate debug flags for filtering
/// * `default_level` - Level for everything not raised by a flag
/// * `log_dir` - Base directory for logs (default: `./logs`)
/// * `retention_days` - Keep logs for N days (default: 30)
/// * `retention_runs` - Keep N most recent runs (default: 10)
#[cfg(feature = "file-logging")]
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    default_level: &str,
    log_dir: Option<PathBuf>,
    retention_days: Option<u64>,
    retention_runs: Option<usize>,
) -> Result<LoggingGuard> {
    use tracing_appender::rolling;

    let base_log_dir = log_dir.unwrap_or_else(|| PathBuf::from("./logs"));

    let timestamp = Utc::now().format(RUN_TIMESTAMP_FORMAT);
    let run_folder = base_log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

    prune_runs(
        &base_log_dir,
        retention_days.unwrap_or(30),
        retention_runs.unwrap_or(10),
        Utc::now(),
    )?;

    let env_filter = EnvFilter::try_new(debug_flags.to_filter_string_with_default(default_level))
        .context("Invalid log filter")?;

    let mut layers = Vec::new();
    let mut file_guards = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(env_filter.clone());
    layers.push(console_layer.boxed());

    for crate_name in crate::KNOWN_CRATES {
        let file_appender = rolling::daily(&run_folder, format!("{}.log", crate_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guards.push(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(EnvFilter::new(format!(
                "{}=debug",
                crate::crate_target(crate_name)
            )))
            .boxed();
        layers.push(file_layer);
    }

    let combined_appender = rolling::daily(&run_folder, "hwcrypto.log");
    let (combined_non_blocking, combined_guard) = tracing_appender::non_blocking(combined_appender);
    let combined_layer = tracing_subscriber::fmt::layer()
        .with_writer(combined_non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(env_filter)
        .boxed();
    layers.push(combined_layer);
    file_guards.push(combined_guard);

    Registry::default()
        .with(layers)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LoggingGuard {
        _file_guards: file_guards,
        log_dir: run_folder,
    })
}

/// Remove old `run_*` folders under `base_log_dir`.
///
/// A run is removed when it is older than `retention_days`, or when more than
/// `retention_runs` runs remain after the age cut. Returns the number removed.
pub fn prune_runs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
    now: DateTime<Utc>,
) -> Result<usize> {
    if !base_log_dir.exists() {
        return Ok(0);
    }

    let cutoff = now - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let stamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(RUN_PREFIX))
            .and_then(|s| NaiveDateTime::parse_from_str(s, RUN_TIMESTAMP_FORMAT).ok());
        if let Some(naive) = stamp {
            runs.push((path, Utc.from_utc_datetime(&naive)));
        }
    }

    // newest first
    runs.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (index, (path, started)) in runs.iter().enumerate() {
        if *started < cutoff || index >= retention_runs {
            match std::fs::remove_dir_all(path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!(
                    "Warning: Failed to remove old log directory {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_run(base: &Path, stamp: DateTime<Utc>) -> PathBuf {
        let dir = base.join(format!("{}{}", RUN_PREFIX, stamp.format(RUN_TIMESTAMP_FORMAT)));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_prune_by_age_and_count() {
        let base = tempdir().unwrap();
        let now = Utc::now();

        let ancient = make_run(base.path(), now - chrono::Duration::days(90));
        let older = make_run(base.path(), now - chrono::Duration::hours(3));
        let newer = make_run(base.path(), now - chrono::Duration::hours(2));
        let newest = make_run(base.path(), now - chrono::Duration::hours(1));
        std::fs::create_dir_all(base.path().join("not_a_run")).unwrap();

        let removed = prune_runs(base.path(), 30, 2, now).unwrap();

        assert_eq!(removed, 2);
        assert!(!ancient.exists());
        assert!(!older.exists());
        assert!(newer.exists());
        assert!(newest.exists());
        assert!(base.path().join("not_a_run").exists());
    }

    #[test]
    fn test_prune_missing_dir() {
        let base = tempdir().unwrap();
        let missing = base.path().join("nothing-here");
        assert_eq!(prune_runs(&missing, 30, 10, Utc::now()).unwrap(), 0);
    }
}
