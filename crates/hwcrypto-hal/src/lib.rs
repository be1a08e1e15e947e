// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hwcrypto-hal
//!
//! Hardware abstraction for crypto engines.
//!
//! The dispatch core never talks to a device directly. It sees each engine
//! through [`CryptoEngineHandle`]: one operation per submission, an
//! asynchronous completion callback, an explicit poll for end-of-transfer,
//! and clock/bus-bandwidth controls.
//!
//! ## Platforms
//! - `simulated` (default feature): an in-memory engine that holds submitted
//!   operations until a test or the poll path releases them, in any order.

pub mod hal;
pub mod platforms;

pub use hal::*;

#[cfg(feature = "simulated")]
pub use platforms::simulated::{CompletionMode, SimEvent, SimulatedEngine};

/// Errors reported by an engine handle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("engine clock is not enabled")]
    ClockDisabled,

    #[error("engine is busy ({in_flight} operations in flight)")]
    DeviceBusy { in_flight: usize },

    #[error("clock control failed: {0}")]
    ClockFailure(String),

    #[error("bus bandwidth vote failed: {0}")]
    BandwidthVote(String),

    #[error("operation rejected by hardware: {0}")]
    Rejected(String),

    #[error("operation failed with status {0}")]
    OperationFailed(i32),

    #[error("authentication tag mismatch")]
    AuthFailure,

    #[error("unsupported on this engine: {0}")]
    Unsupported(&'static str),
}
