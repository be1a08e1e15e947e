// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bus bandwidth and clock state machine
//!
//! ```text
//!   NoBandwidth ──allocate──▶ Allocating ──▶ HasBandwidth
//!        ▲                                      │ reaper: idle, nothing in flight
//!        └──────────── Releasing ◀──────────────┘
//!                          │ work arrived meanwhile
//!                          └──▶ Allocating ──▶ HasBandwidth
//!
//!   NoBandwidth (queues empty) ─────────────────▶ Suspended
//!   HasBandwidth (not in use) ──▶ Suspending ───▶ Suspended ──resume──▶ NoBandwidth
//! ```
//!
//! Allocation and the idle reaper run on the bandwidth worker because the
//! clock and bus handshakes may block. Suspend and resume run on the
//! caller's thread. Every state change happens under the engine lock; the
//! handshakes themselves run with the lock released.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use hwcrypto_hal::{BandwidthLevel, HalError};
use tracing::{debug, info, warn};

use crate::engine::{BandwidthState, Engine, EngineId};
use crate::error::{DispatchError, DispatchResult};
use crate::registry::Shared;
use crate::timer::TimerQueue;
use crate::worker::WorkerLoop;

pub(crate) enum BandwidthJob {
    Allocate(Arc<Engine>),
    ArmReaper(Arc<Engine>),
    CancelReaper(EngineId),
}

/// Vote the bus up (clock first) or down (bandwidth first)
///
/// A failed second step undoes the first so clock and vote stay paired.
pub(crate) fn set_bus(engine: &Engine, high: bool) -> Result<(), HalError> {
    let handle = &engine.handle;
    if high {
        handle.enable_clock()?;
        if let Err(e) = handle.request_bandwidth(BandwidthLevel::High) {
            if let Err(undo) = handle.disable_clock() {
                warn!("[BW] {}: disabling clock after failed vote: {}", engine.id, undo);
            }
            return Err(e);
        }
    } else {
        handle.request_bandwidth(BandwidthLevel::Low)?;
        if let Err(e) = handle.disable_clock() {
            if let Err(undo) = handle.request_bandwidth(BandwidthLevel::High) {
                warn!("[BW] {}: restoring high bandwidth: {}", engine.id, undo);
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Drop the bus vote of a detached engine with nothing left in flight
///
/// Returns `false` while a bandwidth handshake is still running on it.
pub(crate) fn retire(engine: &Engine) -> bool {
    let mut state = engine.state.lock();
    match state.bandwidth {
        BandwidthState::Allocating | BandwidthState::Releasing | BandwidthState::Suspending => {
            false
        }
        BandwidthState::HasBandwidth if engine.caps.bus_scaling => {
            state.bandwidth = BandwidthState::Releasing;
            drop(state);
            if let Err(e) = set_bus(engine, false) {
                warn!("[BW] {}: releasing bus on detach: {}", engine.id, e);
            }
            engine.state.lock().bandwidth = BandwidthState::NoBandwidth;
            debug!("[BW] {} ({}) released bandwidth on detach", engine.id, engine.name());
            true
        }
        _ => true,
    }
}

/// Body of the bandwidth worker: allocation jobs and per-engine reapers
pub(crate) struct BandwidthLoop {
    shared: Weak<Shared>,
    idle_timeout: Duration,
    reapers: TimerQueue<EngineId, Arc<Engine>>,
}

impl BandwidthLoop {
    pub fn new(shared: Weak<Shared>, idle_timeout: Duration) -> Self {
        Self {
            shared,
            idle_timeout,
            reapers: TimerQueue::new(),
        }
    }

    fn arm_reaper(&mut self, engine: Arc<Engine>) {
        self.reapers
            .arm(engine.id, self.idle_timeout, engine, Instant::now());
    }

    fn allocate(&mut self, engine: Arc<Engine>) {
        engine.allocate_pending.store(false, Ordering::Release);
        {
            let mut state = engine.state.lock();
            if state.bandwidth != BandwidthState::NoBandwidth || !engine.is_attached() {
                return;
            }
            state.bandwidth = BandwidthState::Allocating;
        }

        if let Err(e) = set_bus(&engine, true) {
            warn!("[BW] {}: bandwidth allocation failed: {}", engine.id, e);
            engine.state.lock().bandwidth = BandwidthState::NoBandwidth;
            return;
        }
        self.arm_reaper(Arc::clone(&engine));

        {
            let mut state = engine.state.lock();
            state.bandwidth = BandwidthState::HasBandwidth;
            state.active_seq += 1;
            state.check_flag = true;
        }
        debug!("[BW] {} ({}) has bandwidth", engine.id, engine.name());
        engine.schedule_poll();
    }

    /// One reaper expiry for `engine`
    fn reap(&mut self, engine: Arc<Engine>) {
        if !engine.is_attached() {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let mut restart_poll = false;
        let rearm = {
            let mut state = engine.state.lock();
            let active_seq = state.active_seq;
            let idle = state.bandwidth == BandwidthState::HasBandwidth
                && active_seq == state.last_active_seq;

            if idle {
                let in_flight = engine.req_count();
                if in_flight > 0 {
                    if state.check_flag {
                        warn!(
                            "[BW] {} ({}) appears to be stuck: {} in flight, seq {}",
                            engine.id,
                            engine.name(),
                            in_flight,
                            active_seq
                        );
                    }
                    state.check_flag = false;
                } else if engine.caps.bus_scaling {
                    state.bandwidth = BandwidthState::Releasing;
                    drop(state);

                    if let Err(e) = set_bus(&engine, false) {
                        warn!("[BW] {}: bandwidth release failed: {}", engine.id, e);
                    }

                    state = engine.state.lock();
                    if shared.has_queued_work_locked(&state) {
                        // work arrived while the bus was going down
                        state.bandwidth = BandwidthState::Allocating;
                        drop(state);
                        let regained = set_bus(&engine, true);
                        state = engine.state.lock();
                        match regained {
                            Ok(()) => {
                                state.bandwidth = BandwidthState::HasBandwidth;
                                state.active_seq += 1;
                                state.check_flag = true;
                                restart_poll = true;
                            }
                            Err(e) => {
                                warn!("[BW] {}: bandwidth reallocation failed: {}", engine.id, e);
                                state.bandwidth = BandwidthState::NoBandwidth;
                            }
                        }
                    } else {
                        state.bandwidth = BandwidthState::NoBandwidth;
                        debug!("[BW] {} ({}) released bandwidth", engine.id, engine.name());
                    }
                }
            }

            state.last_active_seq = active_seq;
            matches!(
                state.bandwidth,
                BandwidthState::HasBandwidth
                    | BandwidthState::Allocating
                    | BandwidthState::Releasing
            )
        };

        if restart_poll {
            engine.schedule_poll();
        }
        if rearm {
            self.arm_reaper(engine);
        }
    }
}

impl WorkerLoop for BandwidthLoop {
    type Item = BandwidthJob;

    fn handle(&mut self, job: BandwidthJob) {
        match job {
            BandwidthJob::Allocate(engine) => self.allocate(engine),
            BandwidthJob::ArmReaper(engine) => self.arm_reaper(engine),
            BandwidthJob::CancelReaper(id) => {
                self.reapers.cancel(&id);
            }
        }
    }

    fn on_wake(&mut self, now: Instant) -> Duration {
        for (_, engine) in self.reapers.pop_expired(now) {
            self.reap(engine);
        }
        self.reapers
            .next_deadline()
            .map_or(crate::worker::DEFAULT_WAIT, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            })
    }

    fn on_exit(&mut self) {
        self.reapers.clear();
    }
}

/// Quiesce an engine for system suspend
pub(crate) fn suspend(shared: &Shared, engine: &Arc<Engine>) -> DispatchResult<()> {
    if !engine.caps.clk_mgmt_sus_res {
        return Ok(());
    }

    let busy = |state: BandwidthState| DispatchError::EngineBusy {
        engine: engine.id.0,
        state: state.as_str(),
    };

    {
        let mut state = engine.state.lock();
        match state.bandwidth {
            BandwidthState::NoBandwidth => {
                if shared.has_queued_work_locked(&state) {
                    return Err(busy(state.bandwidth));
                }
                state.bandwidth = BandwidthState::Suspended;
            }
            BandwidthState::HasBandwidth => {
                if engine.req_count() > 0 || shared.has_queued_work_locked(&state) {
                    return Err(busy(state.bandwidth));
                }
                state.bandwidth = BandwidthState::Suspending;
                drop(state);

                shared.send_bandwidth(BandwidthJob::CancelReaper(engine.id));
                if let Err(e) = set_bus(engine, false) {
                    warn!("[BW] {}: releasing bus for suspend: {}", engine.id, e);
                }

                engine.state.lock().bandwidth = BandwidthState::Suspended;
            }
            other => return Err(busy(other)),
        }
    }

    if let Err(e) = engine.handle.suspend() {
        warn!("[BW] {}: platform suspend hook failed: {}", engine.id, e);
    }
    info!("[BW] {} ({}) suspended", engine.id, engine.name());
    Ok(())
}

/// Bring a suspended engine back; it re-acquires bandwidth on demand
pub(crate) fn resume(engine: &Arc<Engine>) -> DispatchResult<()> {
    if !engine.caps.clk_mgmt_sus_res {
        return Ok(());
    }

    let current = engine.bandwidth();
    if current != BandwidthState::Suspended {
        return Err(DispatchError::EngineBusy {
            engine: engine.id.0,
            state: current.as_str(),
        });
    }

    if let Err(e) = engine.handle.resume() {
        warn!("[BW] {}: platform resume hook failed: {}", engine.id, e);
    }

    {
        let mut state = engine.state.lock();
        state.bandwidth = BandwidthState::NoBandwidth;
        state.active_seq += 1;
        state.check_flag = false;
    }
    info!("[BW] {} ({}) resumed", engine.id, engine.name());
    engine.schedule_poll();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcrypto_hal::{EngineCapabilities, SimEvent, SimulatedEngine};

    fn engine_with(sim: &Arc<SimulatedEngine>) -> Engine {
        let handle: Arc<dyn hwcrypto_hal::CryptoEngineHandle> = sim.clone();
        Engine::new(EngineId(0), handle, 8, 1)
    }

    #[test]
    fn test_set_bus_order() {
        let sim = Arc::new(SimulatedEngine::new(EngineCapabilities::default()));
        let engine = engine_with(&sim);

        set_bus(&engine, true).unwrap();
        set_bus(&engine, false).unwrap();
        assert_eq!(
            sim.events(),
            vec![
                SimEvent::ClockEnabled,
                SimEvent::Bandwidth(BandwidthLevel::High),
                SimEvent::Bandwidth(BandwidthLevel::Low),
                SimEvent::ClockDisabled,
            ]
        );
    }

    #[test]
    fn test_set_bus_high_undoes_clock_on_vote_failure() {
        let sim = Arc::new(SimulatedEngine::new(EngineCapabilities::default()));
        let engine = engine_with(&sim);
        sim.set_fail_bandwidth(true);

        assert!(set_bus(&engine, true).is_err());
        assert!(!sim.clock_enabled());
    }

    #[test]
    fn test_set_bus_low_revotes_on_clock_failure() {
        let sim = Arc::new(SimulatedEngine::new(EngineCapabilities::default()));
        let engine = engine_with(&sim);
        set_bus(&engine, true).unwrap();
        sim.set_fail_clock_disable(true);

        assert!(set_bus(&engine, false).is_err());
        assert!(sim.clock_enabled());
        assert_eq!(sim.bandwidth_level(), BandwidthLevel::High);
    }

    #[test]
    fn test_resume_requires_suspended() {
        let caps = EngineCapabilities {
            clk_mgmt_sus_res: true,
            ..Default::default()
        };
        let sim = Arc::new(SimulatedEngine::new(caps));
        let engine = Arc::new(engine_with(&sim));
        assert_eq!(
            resume(&engine),
            Err(DispatchError::EngineBusy {
                engine: 0,
                state: "no-bandwidth"
            })
        );
    }

    #[test]
    fn test_suspend_resume_without_clock_management_is_noop() {
        let sim = Arc::new(SimulatedEngine::new(EngineCapabilities::default()));
        let engine = Arc::new(engine_with(&sim));
        assert_eq!(resume(&engine), Ok(()));
        assert_eq!(engine.bandwidth(), BandwidthState::NoBandwidth);
    }
}
