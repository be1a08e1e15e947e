// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-engine runtime state
//!
//! An [`Engine`] wraps one hardware handle with its pending queue, its
//! request-control pool and its bandwidth state. Lock order, outermost
//! first: a transform's response list, `Engine::state`, the registry
//! overflow queue, `Engine::pool`. The hardware handle is never called with
//! any engine lock held.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hwcrypto_hal::{CryptoEngineHandle, EngineCapabilities};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::pool::RequestPool;
use crate::poller::PollController;
use crate::queue::RequestQueue;
use crate::request::PendingRequest;

/// Unit number assigned at attach, unique for the registry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineId(pub u32);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ce{}", self.0)
    }
}

/// Bus bandwidth / clock state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BandwidthState {
    NoBandwidth = 0,
    HasBandwidth = 1,
    Releasing = 2,
    Allocating = 3,
    Suspended = 4,
    Suspending = 5,
}

impl BandwidthState {
    pub fn as_str(self) -> &'static str {
        match self {
            BandwidthState::NoBandwidth => "no-bandwidth",
            BandwidthState::HasBandwidth => "has-bandwidth",
            BandwidthState::Releasing => "releasing",
            BandwidthState::Allocating => "allocating",
            BandwidthState::Suspended => "suspended",
            BandwidthState::Suspending => "suspending",
        }
    }
}

impl fmt::Display for BandwidthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields guarded by the engine lock
pub(crate) struct EngineState {
    pub queue: RequestQueue<Arc<PendingRequest>>,
    pub bandwidth: BandwidthState,
    /// Bumped on every dispatch and bandwidth grant
    pub active_seq: u64,
    /// `active_seq` as seen by the previous reaper run
    pub last_active_seq: u64,
    /// Arms the one-shot "possibly stuck" warning
    pub check_flag: bool,
}

pub(crate) struct Engine {
    pub id: EngineId,
    pub handle: Arc<dyn CryptoEngineHandle>,
    pub caps: EngineCapabilities,
    pub poll_cpu: usize,
    pub state: Mutex<EngineState>,
    pub pool: Mutex<RequestPool<Arc<PendingRequest>>>,
    /// A bandwidth allocation job is queued and not yet run
    pub allocate_pending: AtomicBool,
    pub attached: AtomicBool,
    pub total_req: AtomicU64,
    pub err_req: AtomicU64,
    poller: Mutex<Weak<PollController>>,
}

impl Engine {
    pub fn new(
        id: EngineId,
        handle: Arc<dyn CryptoEngineHandle>,
        queue_len: usize,
        poll_cpu: usize,
    ) -> Self {
        let caps = handle.capabilities();
        // engines without bus scaling never give their clock back
        let bandwidth = if caps.bus_scaling {
            BandwidthState::NoBandwidth
        } else {
            BandwidthState::HasBandwidth
        };
        Self {
            id,
            pool: Mutex::new(RequestPool::new(caps.max_requests.max(1))),
            caps,
            handle,
            poll_cpu,
            state: Mutex::new(EngineState {
                queue: RequestQueue::new(queue_len),
                bandwidth,
                active_seq: 0,
                last_active_seq: 0,
                check_flag: false,
            }),
            allocate_pending: AtomicBool::new(false),
            attached: AtomicBool::new(true),
            total_req: AtomicU64::new(0),
            err_req: AtomicU64::new(0),
            poller: Mutex::new(Weak::new()),
        }
    }

    pub fn device(&self) -> u32 {
        self.caps.device_id
    }

    pub fn hw_instance(&self) -> u32 {
        self.caps.hw_instance
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn bandwidth(&self) -> BandwidthState {
        self.state.lock().bandwidth
    }

    /// In-flight operations
    pub fn req_count(&self) -> usize {
        self.pool.lock().in_use()
    }

    pub fn set_poller(&self, poller: &Arc<PollController>) {
        *self.poller.lock() = Arc::downgrade(poller);
    }

    pub fn poller(&self) -> Option<Arc<PollController>> {
        self.poller.lock().upgrade()
    }

    /// Wake this engine's poll controller
    pub fn schedule_poll(&self) {
        if let Some(poller) = self.poller() {
            poller.schedule();
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("device", &self.caps.device_id)
            .field("hw_instance", &self.caps.hw_instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcrypto_hal::SimulatedEngine;

    fn caps(bus_scaling: bool) -> EngineCapabilities {
        EngineCapabilities {
            device_id: 3,
            hw_instance: 1,
            max_requests: 4,
            bus_scaling,
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_bandwidth_follows_bus_scaling() {
        let scaled = Engine::new(EngineId(0), Arc::new(SimulatedEngine::new(caps(true))), 8, 1);
        assert_eq!(scaled.bandwidth(), BandwidthState::NoBandwidth);

        let fixed = Engine::new(EngineId(1), Arc::new(SimulatedEngine::new(caps(false))), 8, 1);
        assert_eq!(fixed.bandwidth(), BandwidthState::HasBandwidth);
    }

    #[test]
    fn test_pool_sized_to_capability() {
        let engine = Engine::new(EngineId(0), Arc::new(SimulatedEngine::new(caps(true))), 8, 1);
        assert_eq!(engine.pool.lock().capacity(), 4);
        assert_eq!(engine.req_count(), 0);
        assert_eq!(engine.device(), 3);
        assert_eq!(engine.hw_instance(), 1);
        assert!(engine.poller().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(EngineId(2).to_string(), "ce2");
        assert_eq!(BandwidthState::Releasing.to_string(), "releasing");
    }
}
