// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hwcrypto - request dispatch for hardware crypto engines
//!
//! Sits between crypto callers and a set of hardware engines. Requests are
//! balanced across engines, bounded by each engine's concurrent slots, and
//! their results handed back to every transform in submission order, while
//! each engine's bus bandwidth and clock are raised on demand and dropped
//! again once it goes idle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hwcrypto::prelude::*;
//!
//! let config = DispatchConfig::default();
//! let registry = Registry::new(&config)?;
//! registry.attach_engine(Arc::new(SimulatedEngine::new(EngineCapabilities::default())), None)?;
//!
//! let transform = registry.create_transform(Algorithm::AesCbc)?;
//! transform.set_key(&[0u8; 16])?;
//! registry.submit(
//!     &transform,
//!     CryptoRequest::new(Direction::Encrypt, vec![0u8; 64], |status| {
//!         println!("request finished: {:?}", status);
//!     })
//!     .with_iv(vec![0u8; 16]),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: hwcrypto-config, hwcrypto-observability    │
//! │  (TOML + env overrides, tracing setup)                  │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Platform: hwcrypto-hal                                 │
//! │  (engine handle trait, simulated engine)                │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Core: hwcrypto-dispatch                                │
//! │  (registry, slot pools, bandwidth, polling, reorder)    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Feature Flags
//! - **`file-logging`** (default): per-crate JSON log files with rotation
//!
//! ## License
//!
//! Apache-2.0

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

pub use hwcrypto_config as config;
pub use hwcrypto_dispatch as dispatch;
pub use hwcrypto_hal as hal;
pub use hwcrypto_observability as observability;

use hwcrypto_config::{DispatchConfig, LoggingConfig};
use hwcrypto_dispatch::Registry;
use hwcrypto_observability::{CrateDebugFlags, LoggingGuard};

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, DispatchConfig};
    pub use crate::dispatch::{
        Algorithm, BandwidthState, ContextFlags, CryptoRequest, Direction, DispatchError,
        DispatchResult, DispatchStats, EngineId, ProcessingStatus, Registry, RequestStatus,
        Submitted, Transform,
    };
    pub use crate::hal::{CryptoEngineHandle, EngineCapabilities, HalError, SimulatedEngine};
}

/// Install logging as described by the `[logging]` section
///
/// Returns the file writer guard when file output is active; keep it alive
/// for as long as logs should be written.
pub fn init_logging_from_config(
    logging: &LoggingConfig,
    debug_flags: &CrateDebugFlags,
) -> anyhow::Result<Option<LoggingGuard>> {
    if logging.file_output {
        #[cfg(feature = "file-logging")]
        {
            let guard = hwcrypto_observability::init_logging(
                debug_flags,
                &logging.level,
                Some(logging.log_dir.clone()),
                Some(logging.retention_days),
                Some(logging.retention_runs),
            )?;
            info!("[HWCRYPTO] logging to {}", guard.log_dir().display());
            return Ok(Some(guard));
        }
    }

    hwcrypto_observability::init_console_logging(debug_flags, &logging.level)?;
    if logging.file_output {
        warn!("[HWCRYPTO] file output requested but built without file-logging");
    }
    Ok(None)
}

/// Load configuration (explicit path, `HWCRYPTO_CONFIG_PATH` or the default
/// search) and build a registry from it
pub fn registry_from_config_file(path: Option<&Path>) -> anyhow::Result<(DispatchConfig, Registry)> {
    let config = hwcrypto_config::load_config(path, None).context("Failed to load configuration")?;
    let registry = Registry::new(&config).context("Failed to start dispatch registry")?;
    info!(
        "[HWCRYPTO] registry started: queue length {}, poll interval {:?}",
        config.queues.request_queue_length,
        config.polling.interval()
    );
    Ok((config, registry))
}
