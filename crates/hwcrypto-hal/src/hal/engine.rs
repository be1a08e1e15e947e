// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use super::algorithm::{Algorithm, Direction};
use crate::HalError;

/// What an engine can do, queried once when it is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Device identifier (the bus the engine sits on)
    pub device_id: u32,
    /// Instance number of the engine on that device
    pub hw_instance: u32,
    /// Maximum operations the engine accepts concurrently
    pub max_requests: usize,
    /// Required buffer alignment in bytes
    pub alignment: usize,
    pub aes_key_192: bool,
    /// Engine can use keys provisioned in hardware
    pub hw_key_support: bool,
    /// Clocks must be managed across suspend/resume
    pub clk_mgmt_sus_res: bool,
    /// Bus bandwidth must be voted up before dispatch
    pub bus_scaling: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            device_id: 0,
            hw_instance: 0,
            max_requests: 1,
            alignment: 1,
            aes_key_192: true,
            hw_key_support: false,
            clk_mgmt_sus_res: false,
            bus_scaling: true,
        }
    }
}

impl EngineCapabilities {
    /// Engine takes part in power management at all
    pub fn power_managed(&self) -> bool {
        self.clk_mgmt_sus_res || self.bus_scaling
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandwidthLevel {
    Low,
    High,
}

/// One operation as handed to the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwOperation {
    pub algorithm: Algorithm,
    pub direction: Direction,
    /// Cipher key (empty when the hardware key is used)
    pub key: Vec<u8>,
    /// Authentication key for HMAC and authenc algorithms
    pub auth_key: Vec<u8>,
    pub use_hw_key: bool,
    pub iv: Vec<u8>,
    /// Associated data (AEAD only)
    pub assoc: Vec<u8>,
    pub data: Vec<u8>,
    /// Tag length for AEAD
    pub auth_size: usize,
}

pub type HwResult = Result<Vec<u8>, HalError>;

/// Invoked exactly once when the engine finishes an accepted operation.
pub type CompletionCallback = Box<dyn FnOnce(HwResult) + Send + 'static>;

/// Handle to one hardware crypto engine
///
/// Implementations must not call `done` from inside `submit_operation`; the
/// completion is reported later, either from `poll_for_completion` or from
/// the engine's own interrupt context. When `submit_operation` returns an
/// error the callback is dropped without being called.
pub trait CryptoEngineHandle: Send + Sync {
    /// Human-readable engine name for logs
    fn name(&self) -> &str;

    fn capabilities(&self) -> EngineCapabilities;

    /// Start one operation
    fn submit_operation(&self, op: HwOperation, done: CompletionCallback) -> Result<(), HalError>;

    /// Check for end-of-transfer and report finished operations.
    ///
    /// Returns the number of completions delivered by this call.
    fn poll_for_completion(&self) -> usize;

    fn enable_clock(&self) -> Result<(), HalError>;

    fn disable_clock(&self) -> Result<(), HalError>;

    fn request_bandwidth(&self, level: BandwidthLevel) -> Result<(), HalError>;

    /// Platform suspend hook, called after the engine released its resources
    fn suspend(&self) -> Result<(), HalError> {
        Ok(())
    }

    /// Platform resume hook, called before the engine is marked usable again
    fn resume(&self) -> Result<(), HalError> {
        Ok(())
    }
}
