// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/// Algorithm identifiers and their fixed properties.
pub mod algorithm;
/// Engine handle trait and the types crossing it.
pub mod engine;

pub use algorithm::{Algorithm, Direction, OperationKind};
pub use engine::{
    BandwidthLevel, CompletionCallback, CryptoEngineHandle, EngineCapabilities, HwOperation,
    HwResult,
};
