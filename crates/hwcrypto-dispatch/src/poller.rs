// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Polling controllers
//!
//! One controller per CPU. Each owns a ring of engines and a worker thread,
//! pinned to that CPU, that while scheduled ticks every `interval`: it
//! collects completions from engines that have bandwidth, feeds them new
//! work, and asks for bandwidth on behalf of idle engines with queued
//! requests. After `max_retry` consecutive ticks with nothing in flight the
//! controller goes idle until the next [`PollController::schedule`].
//!
//! A detached engine stays in the ring until its in-flight operations have
//! completed; the tick that finds it empty releases its bus and drops it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use hwcrypto_config::MAX_POLL_INTERVAL_US;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::affinity;
use crate::bandwidth;
use crate::engine::{BandwidthState, Engine, EngineId};
use crate::registry::Shared;
use crate::schedule::{ScheduleFlag, ScheduleState};
use crate::worker::{WorkerLoop, DEFAULT_WAIT};

struct PollRing {
    engines: Vec<Arc<Engine>>,
    /// Index of the engine each tick starts from
    first: usize,
}

pub(crate) struct PollController {
    pub cpu: usize,
    ring: Mutex<PollRing>,
    flag: ScheduleFlag,
    interval_us: AtomicU64,
    max_retry: u32,
    running: AtomicBool,
    polls: AtomicU64,
    scheds: AtomicU64,
    /// CPUs the worker thread reported after pinning
    affinity: Mutex<Option<Vec<usize>>>,
    wake: Sender<()>,
}

impl PollController {
    pub fn new(cpu: usize, interval: Duration, max_retry: u32) -> (Arc<Self>, Receiver<()>) {
        let (wake, rx) = crossbeam::channel::unbounded();
        let controller = Arc::new(Self {
            cpu,
            ring: Mutex::new(PollRing {
                engines: Vec::new(),
                first: 0,
            }),
            flag: ScheduleFlag::new(),
            interval_us: AtomicU64::new(clamp_interval(interval)),
            max_retry,
            running: AtomicBool::new(true),
            polls: AtomicU64::new(0),
            scheds: AtomicU64::new(0),
            affinity: Mutex::new(None),
            wake,
        });
        (controller, rx)
    }

    pub fn attach(&self, engine: Arc<Engine>) {
        self.ring.lock().engines.push(engine);
    }

    /// Remove an engine; the start position moves on if it pointed at it
    pub fn detach(&self, id: EngineId) {
        let mut ring = self.ring.lock();
        let Some(index) = ring.engines.iter().position(|e| e.id == id) else {
            return;
        };
        ring.engines.remove(index);
        if ring.engines.is_empty() {
            ring.first = 0;
        } else if index < ring.first {
            ring.first -= 1;
        } else if ring.first >= ring.engines.len() {
            ring.first = 0;
        }
    }

    /// Engines in polling order, starting at the ring's first engine
    pub fn engines(&self) -> Vec<Arc<Engine>> {
        let ring = self.ring.lock();
        let len = ring.engines.len();
        (0..len)
            .map(|i| Arc::clone(&ring.engines[(ring.first + i) % len]))
            .collect()
    }

    pub fn engine_ids(&self) -> Vec<EngineId> {
        self.engines().iter().map(|e| e.id).collect()
    }

    /// Any engine in the ring with requests waiting to be dispatched
    pub fn has_queued_work(&self, shared: &Shared) -> bool {
        self.engines()
            .iter()
            .any(|engine| engine.is_attached() && shared.has_queued_work(engine))
    }

    /// Pin the calling thread to this controller's CPU
    ///
    /// Failure is logged and the controller keeps running unpinned.
    fn pin_current_thread(&self) {
        if let Err(e) = affinity::pin_current_thread(self.cpu) {
            warn!("[POLL] cpu {}: running unpinned: {}", self.cpu, e);
            return;
        }
        match affinity::current_thread_cpus() {
            Ok(cpus) => {
                debug!("[POLL] controller pinned to cpus {:?}", cpus);
                *self.affinity.lock() = Some(cpus);
            }
            Err(e) => warn!("[POLL] cpu {}: reading affinity back: {}", self.cpu, e),
        }
    }

    /// CPUs the worker thread runs on; `None` until it has been pinned
    pub fn affinity(&self) -> Option<Vec<usize>> {
        self.affinity.lock().clone()
    }

    /// Arm the controller; a no-op while it is already polling
    pub fn schedule(&self) {
        if self.flag.request() {
            self.scheds.fetch_add(1, Ordering::Relaxed);
            trace!("[POLL] cpu {} scheduled", self.cpu);
            if self.wake.send(()).is_err() {
                self.flag.reset();
            }
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.flag.state()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us.load(Ordering::Relaxed))
    }

    /// Change the tick period; values above one second are clamped
    pub fn set_interval(&self, interval: Duration) -> Duration {
        let us = clamp_interval(interval);
        self.interval_us.store(us, Ordering::Relaxed);
        Duration::from_micros(us)
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn scheds(&self) -> u64 {
        self.scheds.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.polls.store(0, Ordering::Relaxed);
        self.scheds.store(0, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One polling pass. Returns the number of operations still in flight.
    pub fn tick(&self, shared: &Shared) -> usize {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let mut in_flight = 0;

        for engine in self.engines() {
            if !engine.is_attached() {
                in_flight += self.drain_detached(&engine);
                continue;
            }
            match engine.bandwidth() {
                BandwidthState::HasBandwidth => {
                    engine.handle.poll_for_completion();
                    shared.start_process(&engine);
                    in_flight += engine.req_count();
                }
                BandwidthState::NoBandwidth => {
                    if engine.caps.power_managed()
                        && shared.has_queued_work(&engine)
                        && !engine.allocate_pending.load(Ordering::Acquire)
                    {
                        shared.request_allocation(&engine);
                    }
                }
                _ => {}
            }
        }

        shared.reorder.schedule();
        in_flight
    }

    /// Collect completions from a detached engine and drop it from the ring
    /// once nothing is left in flight. Returns the work still outstanding.
    fn drain_detached(&self, engine: &Arc<Engine>) -> usize {
        if engine.bandwidth() == BandwidthState::HasBandwidth {
            engine.handle.poll_for_completion();
        }
        let remaining = engine.req_count();
        if remaining > 0 {
            return remaining;
        }
        if !bandwidth::retire(engine) {
            // bandwidth handshake still running; look again next tick
            return 1;
        }
        self.detach(engine.id);
        debug!("[POLL] cpu {}: {} drained and removed", self.cpu, engine.id);
        0
    }
}

fn clamp_interval(interval: Duration) -> u64 {
    let us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
    us.clamp(1, MAX_POLL_INTERVAL_US)
}

/// Body of a poll controller's worker thread
pub(crate) struct PollLoop {
    controller: Arc<PollController>,
    shared: Weak<Shared>,
    pinned: bool,
}

impl PollLoop {
    pub fn new(controller: Arc<PollController>, shared: Weak<Shared>) -> Self {
        Self {
            controller,
            shared,
            pinned: false,
        }
    }
}

impl WorkerLoop for PollLoop {
    type Item = ();

    fn on_wake(&mut self, _now: Instant) -> Duration {
        if !self.pinned {
            self.pinned = true;
            self.controller.pin_current_thread();
        }
        DEFAULT_WAIT
    }

    fn handle(&mut self, _wake: ()) {
        let ctl = &self.controller;
        let mut retry = 0u32;
        loop {
            if !ctl.is_running() {
                ctl.flag.reset();
                return;
            }
            let Some(shared) = self.shared.upgrade() else {
                ctl.flag.reset();
                return;
            };
            let in_flight = ctl.tick(&shared);
            drop(shared);

            if in_flight == 0 {
                retry += 1;
                if retry > ctl.max_retry() {
                    retry = 0;
                    if ctl.flag.try_finish() {
                        debug!("[POLL] cpu {} idle after {} empty ticks", ctl.cpu, ctl.max_retry());
                        return;
                    }
                    continue;
                }
            } else {
                retry = 0;
            }
            thread::sleep(ctl.interval());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcrypto_hal::{EngineCapabilities, SimulatedEngine};

    fn engine(unit: u32) -> Arc<Engine> {
        let caps = EngineCapabilities {
            device_id: unit,
            ..Default::default()
        };
        Arc::new(Engine::new(
            EngineId(unit),
            Arc::new(SimulatedEngine::new(caps)),
            16,
            1,
        ))
    }

    #[test]
    fn test_interval_is_clamped() {
        let (ctl, _rx) = PollController::new(1, Duration::from_secs(5), 10);
        assert_eq!(ctl.interval(), Duration::from_secs(1));
        assert_eq!(ctl.set_interval(Duration::from_micros(350)), Duration::from_micros(350));
        assert_eq!(ctl.set_interval(Duration::ZERO), Duration::from_micros(1));
    }

    #[test]
    fn test_schedule_sends_one_wakeup_per_idle_edge() {
        let (ctl, rx) = PollController::new(0, Duration::from_micros(350), 10);
        ctl.schedule();
        ctl.schedule();
        ctl.schedule();
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(ctl.scheds(), 1);
        assert_eq!(ctl.state(), ScheduleState::ScheduleAgain);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_controller_thread_reports_its_affinity() {
        use crate::worker::WorkerThread;

        let cpu = *affinity::current_thread_cpus().unwrap().first().unwrap();
        let (ctl, rx) = PollController::new(cpu, Duration::from_micros(350), 10);
        let mut worker = WorkerThread::spawn(
            format!("hwcrypto-poll-{}", cpu),
            rx,
            PollLoop::new(Arc::clone(&ctl), Weak::new()),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ctl.affinity().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ctl.affinity(), Some(vec![cpu]));
        worker.stop();
    }

    #[test]
    fn test_unpinnable_cpu_keeps_controller_running() {
        use crate::worker::WorkerThread;

        let (ctl, rx) = PollController::new(usize::MAX, Duration::from_micros(350), 10);
        let mut worker = WorkerThread::spawn(
            "hwcrypto-poll-bad".to_string(),
            rx,
            PollLoop::new(Arc::clone(&ctl), Weak::new()),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(worker.is_running());
        assert_eq!(ctl.affinity(), None);
        worker.stop();
    }

    #[test]
    fn test_detach_moves_first_engine() {
        let (ctl, _rx) = PollController::new(0, Duration::from_micros(350), 10);
        for unit in 0..3 {
            ctl.attach(engine(unit));
        }
        assert_eq!(ctl.engine_ids(), vec![EngineId(0), EngineId(1), EngineId(2)]);

        ctl.detach(EngineId(0));
        assert_eq!(ctl.engine_ids(), vec![EngineId(1), EngineId(2)]);
        ctl.detach(EngineId(2));
        ctl.detach(EngineId(1));
        assert!(ctl.engines().is_empty());
        ctl.detach(EngineId(1));
    }
}
