// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hwcrypto-observability
//!
//! Logging setup shared by every hwcrypto crate, with per-crate debug flag
//! support.
//!
//! ## Features
//! - `file-logging`: per-crate JSON log files with daily rotation

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known hwcrypto crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "hwcrypto",
    "hwcrypto-config",
    "hwcrypto-hal",
    "hwcrypto-dispatch",
];

/// Convert a crate name to the module-path form used by tracing targets.
pub fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
