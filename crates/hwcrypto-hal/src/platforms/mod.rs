// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/// In-memory engine with externally controlled completion order.
#[cfg(feature = "simulated")]
pub mod simulated;
