// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dispatch error types

use hwcrypto_config::ConfigError;
use hwcrypto_hal::HalError;

/// Error categories callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Out of slots or queue space; retry later or opt into backlog
    ResourceExhausted,
    /// The engine reported a failure for a dispatched operation
    HardwareFailure,
    /// Internal bookkeeping mismatch (double release, unknown completion)
    IntegrityViolation,
    /// Rejected before dispatch: bad key, tag size, lengths or setup
    ConfigurationError,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("queue full; request not accepted")]
    Busy,

    #[error("no free request slot on engine {0}")]
    ResourceExhausted(u32),

    #[error("no crypto engine matches the request")]
    NoDevice,

    #[error("no poll controller available")]
    NoPollController,

    #[error("engine {engine} is busy in state {state}")]
    EngineBusy { engine: u32, state: &'static str },

    #[error("invalid key length {len} for {algorithm}")]
    InvalidKeyLength { algorithm: &'static str, len: usize },

    #[error("invalid authentication tag size {size} for {algorithm}")]
    InvalidAuthSize { algorithm: &'static str, size: usize },

    #[error("request length overflows the engine's 32-bit length field")]
    LengthOverflow,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid transform flags: {0}")]
    InvalidFlags(&'static str),

    #[error("hardware failure: {0}")]
    Hardware(#[from] HalError),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry is shut down")]
    ShutDown,

    #[error("failed to start worker thread: {0}")]
    Spawn(String),
}

impl DispatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Busy | Self::ResourceExhausted(_) | Self::EngineBusy { .. } => {
                ErrorClass::ResourceExhausted
            }
            Self::Hardware(_) => ErrorClass::HardwareFailure,
            Self::Integrity(_) => ErrorClass::IntegrityViolation,
            Self::NoDevice
            | Self::NoPollController
            | Self::InvalidKeyLength { .. }
            | Self::InvalidAuthSize { .. }
            | Self::LengthOverflow
            | Self::InvalidRequest(_)
            | Self::InvalidFlags(_)
            | Self::Config(_)
            | Self::ShutDown
            | Self::Spawn(_) => ErrorClass::ConfigurationError,
        }
    }
}

impl From<ConfigError> for DispatchError {
    fn from(err: ConfigError) -> Self {
        DispatchError::Config(err.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
