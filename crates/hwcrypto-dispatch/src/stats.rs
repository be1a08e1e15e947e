// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dispatch statistics
//!
//! Counters live next to the state they describe (engines, poll
//! controllers, the reorder pipeline). [`DispatchStats`] is a point-in-time
//! copy of all of them, serializable and printable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hwcrypto_hal::OperationKind;
use serde::{Deserialize, Serialize};

use crate::engine::BandwidthState;
use crate::reorder::ProcessingStatus;

/// Successful and failed completions per operation family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub cipher_success: u64,
    pub cipher_fail: u64,
    pub hash_success: u64,
    pub hash_fail: u64,
    pub aead_success: u64,
    pub aead_fail: u64,
}

#[derive(Debug, Default)]
pub(crate) struct OperationCounters {
    cipher_success: AtomicU64,
    cipher_fail: AtomicU64,
    hash_success: AtomicU64,
    hash_fail: AtomicU64,
    aead_success: AtomicU64,
    aead_fail: AtomicU64,
}

impl OperationCounters {
    pub fn record(&self, kind: OperationKind, success: bool) {
        let counter = match (kind, success) {
            (OperationKind::Cipher, true) => &self.cipher_success,
            (OperationKind::Cipher, false) => &self.cipher_fail,
            (OperationKind::Hash, true) => &self.hash_success,
            (OperationKind::Hash, false) => &self.hash_fail,
            (OperationKind::Aead, true) => &self.aead_success,
            (OperationKind::Aead, false) => &self.aead_fail,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OperationStats {
        OperationStats {
            cipher_success: self.cipher_success.load(Ordering::Relaxed),
            cipher_fail: self.cipher_fail.load(Ordering::Relaxed),
            hash_success: self.hash_success.load(Ordering::Relaxed),
            hash_fail: self.hash_fail.load(Ordering::Relaxed),
            aead_success: self.aead_success.load(Ordering::Relaxed),
            aead_fail: self.aead_fail.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.cipher_success,
            &self.cipher_fail,
            &self.hash_success,
            &self.hash_fail,
            &self.aead_success,
            &self.aead_fail,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub unit: u32,
    pub name: String,
    pub device: u32,
    pub hw_instance: u32,
    pub poll_cpu: usize,
    pub total_requests: u64,
    pub error_requests: u64,
    /// Slots occupied right now
    pub active: usize,
    /// Highest slot occupancy observed
    pub max_active: usize,
    pub max_requests: usize,
    pub queued: usize,
    pub bandwidth: BandwidthState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerStats {
    pub cpu: usize,
    pub polls: u64,
    pub schedules: u64,
    pub state: String,
    pub interval_us: u64,
    pub engines: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub engines: Vec<EngineStats>,
    pub pollers: Vec<PollerStats>,
    pub processing: ProcessingStatus,
    /// Entries in the shared overflow queue
    pub overflow_queued: usize,
    pub max_qlen: usize,
    pub req_drop_cnt: u64,
    pub ready_depth: usize,
    pub max_resp_qlen: usize,
    pub max_reorder_cnt: usize,
    pub resp_stop: u64,
    pub resp_start: u64,
    pub queue_complete_work: u64,
    pub operations: OperationStats,
}

impl DispatchStats {
    pub fn engine(&self, unit: u32) -> Option<&EngineStats> {
        self.engines.iter().find(|e| e.unit == unit)
    }

    pub fn total_requests(&self) -> u64 {
        self.engines.iter().map(|e| e.total_requests).sum()
    }
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Crypto dispatch statistics")?;
        writeln!(f, "  processing           : {:?}", self.processing)?;
        writeln!(f, "  overflow queued      : {}", self.overflow_queued)?;
        writeln!(f, "  max queue length     : {}", self.max_qlen)?;
        writeln!(f, "  dropped requests     : {}", self.req_drop_cnt)?;
        writeln!(f, "  ready depth          : {}", self.ready_depth)?;
        writeln!(f, "  max ready depth      : {}", self.max_resp_qlen)?;
        writeln!(f, "  max reorder batch    : {}", self.max_reorder_cnt)?;
        writeln!(f, "  dispatch stops       : {}", self.resp_stop)?;
        writeln!(f, "  dispatch restarts    : {}", self.resp_start)?;
        writeln!(f, "  delivery schedules   : {}", self.queue_complete_work)?;

        let ops = &self.operations;
        writeln!(f, "  cipher ok/fail       : {}/{}", ops.cipher_success, ops.cipher_fail)?;
        writeln!(f, "  hash ok/fail         : {}/{}", ops.hash_success, ops.hash_fail)?;
        writeln!(f, "  aead ok/fail         : {}/{}", ops.aead_success, ops.aead_fail)?;

        for engine in &self.engines {
            writeln!(
                f,
                "  engine {} ({}) device {} instance {}: total {} errors {} active {}/{} max {} queued {} [{}] cpu {}",
                engine.unit,
                engine.name,
                engine.device,
                engine.hw_instance,
                engine.total_requests,
                engine.error_requests,
                engine.active,
                engine.max_requests,
                engine.max_active,
                engine.queued,
                engine.bandwidth,
                engine.poll_cpu,
            )?;
        }
        for poller in &self.pollers {
            writeln!(
                f,
                "  poller cpu {}: polls {} schedules {} state {} interval {}us engines {:?}",
                poller.cpu,
                poller.polls,
                poller.schedules,
                poller.state,
                poller.interval_us,
                poller.engines,
            )?;
        }
        Ok(())
    }
}
