// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Engine registry and load balancer
//!
//! The [`Registry`] owns every engine, the shared overflow queue, the poll
//! controllers and the background workers. Requests enter through
//! [`Registry::submit`]: a transform pinned to an engine queues on that
//! engine, an unpinned one queues on the overflow queue that every engine
//! drains once its own queue is empty.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::channel::Sender;
use hwcrypto_config::{validate_config, DispatchConfig};
use hwcrypto_hal::{Algorithm, CompletionCallback, CryptoEngineHandle, EngineCapabilities};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::bandwidth::{self, BandwidthJob, BandwidthLoop};
use crate::engine::{BandwidthState, Engine, EngineId, EngineState};
use crate::error::{DispatchError, DispatchResult};
use crate::poller::{PollController, PollLoop};
use crate::pool::SlotId;
use crate::queue::RequestQueue;
use crate::reorder::{DeliveryLoop, ProcessingStatus, ReorderPipeline};
use crate::request::{CryptoRequest, PendingRequest, RequestStatus, Submitted};
use crate::stats::{DispatchStats, EngineStats, OperationCounters, PollerStats};
use crate::transform::{ResponseRecord, Transform, TransformShared, HMAC_MAX_DIRECT_KEY};
use crate::worker::WorkerThread;

/// How often a blocked HMAC key setup re-checks for shutdown
const HMAC_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Public description of an attached engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub id: EngineId,
    pub name: String,
    pub device: u32,
    pub hw_instance: u32,
    pub poll_cpu: usize,
    pub capabilities: EngineCapabilities,
    pub bandwidth: BandwidthState,
}

impl EngineInfo {
    fn of(engine: &Engine) -> Self {
        Self {
            id: engine.id,
            name: engine.name().to_string(),
            device: engine.device(),
            hw_instance: engine.hw_instance(),
            poll_cpu: engine.poll_cpu,
            capabilities: engine.caps.clone(),
            bandwidth: engine.bandwidth(),
        }
    }
}

struct Settings {
    queue_len: usize,
    static_assign: bool,
    poll_interval: Duration,
    max_retry: u32,
    default_cpu: usize,
}

/// State reachable from transforms and background workers
pub(crate) struct Shared {
    self_ref: Weak<Shared>,
    settings: Settings,
    engines: RwLock<Vec<Arc<Engine>>>,
    /// Round-robin position for static assignment
    cursor: Mutex<usize>,
    next_unit: AtomicU32,
    next_ticket: AtomicU64,
    next_transform: AtomicU64,
    overflow: Mutex<RequestQueue<Arc<PendingRequest>>>,
    max_qlen: AtomicUsize,
    req_drop_cnt: AtomicU64,
    pollers: RwLock<Vec<Arc<PollController>>>,
    pub reorder: Arc<ReorderPipeline>,
    op_stats: Arc<OperationCounters>,
    bandwidth: Sender<BandwidthJob>,
    running: AtomicBool,
}

impl Shared {
    fn ensure_running(&self) -> DispatchResult<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DispatchError::ShutDown)
        }
    }

    pub fn find_engine(&self, device: u32, hw_instance: Option<u32>) -> Option<Arc<Engine>> {
        self.engines
            .read()
            .iter()
            .find(|e| e.device() == device && hw_instance.map_or(true, |hw| e.hw_instance() == hw))
            .cloned()
    }

    fn engine_by_id(&self, id: EngineId) -> DispatchResult<Arc<Engine>> {
        self.engines
            .read()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(DispatchError::NoDevice)
    }

    pub fn any_engine(&self, pred: &dyn Fn(&EngineCapabilities) -> bool) -> bool {
        self.engines.read().iter().any(|e| pred(&e.caps))
    }

    /// Next engine in round-robin order
    fn next_engine(&self) -> Option<Arc<Engine>> {
        let engines = self.engines.read();
        if engines.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock();
        let index = *cursor % engines.len();
        *cursor = (index + 1) % engines.len();
        Some(Arc::clone(&engines[index]))
    }

    fn first_poller(&self) -> Option<Arc<PollController>> {
        self.pollers.read().first().cloned()
    }

    /// Wake the controllers that have requests waiting on their engines
    pub fn kick_pollers(&self) {
        let pollers = self.pollers.read().clone();
        for poller in pollers {
            if poller.has_queued_work(self) {
                poller.schedule();
            }
        }
    }

    pub fn send_bandwidth(&self, job: BandwidthJob) {
        if self.bandwidth.send(job).is_err() {
            debug!("[BW] bandwidth worker gone; job dropped");
        }
    }

    /// Queue a bandwidth allocation unless one is already queued
    pub fn request_allocation(&self, engine: &Arc<Engine>) {
        if !engine.allocate_pending.swap(true, Ordering::AcqRel) {
            trace!("[BW] {} allocation requested", engine.id);
            self.send_bandwidth(BandwidthJob::Allocate(Arc::clone(engine)));
        }
    }

    pub fn has_queued_work(&self, engine: &Engine) -> bool {
        let state = engine.state.lock();
        self.has_queued_work_locked(&state)
    }

    /// Same as [`Shared::has_queued_work`] for a caller holding the engine lock
    pub fn has_queued_work_locked(&self, state: &EngineState) -> bool {
        !state.queue.is_empty() || !self.overflow.lock().is_empty()
    }

    /// Queue a request for `transform`, running it as `algorithm`
    pub fn submit(
        &self,
        transform: &Arc<TransformShared>,
        request: CryptoRequest,
        algorithm: Algorithm,
    ) -> DispatchResult<Submitted> {
        self.ensure_running()?;
        let (operation, engine) = transform.prepare(&request, algorithm)?;
        if let Some(engine) = &engine {
            if !engine.is_attached() {
                return Err(DispatchError::NoDevice);
            }
        }
        let poller = match &engine {
            Some(engine) => engine.poller(),
            None => self.first_poller(),
        }
        .ok_or(DispatchError::NoPollController)?;

        let may_backlog = request.may_backlog;
        // the response record must exist before the completion can look for it
        let mut responses = transform.responses.lock();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::new(PendingRequest {
            ticket,
            transform: Arc::clone(transform),
            operation,
            on_complete: Arc::clone(&request.on_complete),
        });

        let queued = match &engine {
            Some(engine) => {
                let mut state = engine.state.lock();
                // detach clears the flag and drains the queue under this lock
                if !engine.is_attached() {
                    return Err(DispatchError::NoDevice);
                }
                let queued = state.queue.enqueue(pending, may_backlog);
                self.max_qlen.fetch_max(state.queue.len(), Ordering::Relaxed);
                queued
            }
            None => {
                let mut overflow = self.overflow.lock();
                let queued = overflow.enqueue(pending, may_backlog);
                self.max_qlen.fetch_max(overflow.len(), Ordering::Relaxed);
                queued
            }
        };

        match queued {
            Ok(submitted) => {
                responses.push_back(ResponseRecord {
                    ticket,
                    outcome: None,
                    on_complete: request.on_complete,
                });
                drop(responses);
                trace!(
                    "[REGISTRY] request {} on transform {} {:?}",
                    ticket,
                    transform.id,
                    submitted
                );
                poller.schedule();
                Ok(submitted)
            }
            Err(_) => {
                self.req_drop_cnt.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::Busy)
            }
        }
    }

    /// Move queued work into free slots and hand it to the hardware
    pub fn start_process(&self, engine: &Arc<Engine>) {
        if self.reorder.is_stopped() {
            return;
        }

        let mut promoted = Vec::new();
        let dispatch: Vec<(Option<SlotId>, Arc<PendingRequest>)> = {
            let mut state = engine.state.lock();
            if state.bandwidth != BandwidthState::HasBandwidth || !engine.is_attached() {
                return;
            }
            let free = engine.pool.lock().free();
            let mut batch = Vec::new();
            while batch.len() < free {
                let next = match state.queue.dequeue() {
                    Some(entry) => Some(entry),
                    None => self.overflow.lock().dequeue(),
                };
                let Some((request, leaving_backlog)) = next else {
                    break;
                };
                if let Some(entry) = leaving_backlog {
                    promoted.push(entry);
                }
                batch.push(request);
            }
            if batch.is_empty() {
                return;
            }

            state.active_seq += 1;
            state.check_flag = true;
            let mut pool = engine.pool.lock();
            let slots = batch
                .into_iter()
                .map(|request| (pool.acquire(Arc::clone(&request)), request))
                .collect();
            slots
        };

        for entry in promoted {
            entry.notify_in_progress();
        }
        for (slot, request) in dispatch {
            self.engine_req(engine, slot, request);
        }
    }

    fn engine_req(&self, engine: &Arc<Engine>, slot: Option<SlotId>, request: Arc<PendingRequest>) {
        engine.total_req.fetch_add(1, Ordering::Relaxed);
        let ticket = request.ticket;

        let Some(slot) = slot else {
            self.fail_dispatch(engine, &request, DispatchError::ResourceExhausted(engine.id.0));
            return;
        };

        let done = completion(engine, slot, ticket, &self.reorder, &self.op_stats);
        match engine.handle.submit_operation(request.operation.clone(), done) {
            Ok(()) => trace!("[REGISTRY] request {} running on {}", ticket, engine.id),
            Err(e) => {
                engine.pool.lock().release(slot);
                warn!("[REGISTRY] {} rejected request {}: {}", engine.id, ticket, e);
                self.fail_dispatch(engine, &request, DispatchError::Hardware(e));
            }
        }
    }

    fn fail_dispatch(&self, engine: &Engine, request: &PendingRequest, error: DispatchError) {
        engine.err_req.fetch_add(1, Ordering::Relaxed);
        self.op_stats.record(request.kind(), false);
        self.reorder
            .complete(&request.transform, request.ticket, Err(error));
    }

    /// Fail every queued request in `requests` with `error`
    fn fail_queued(&self, requests: Vec<Arc<PendingRequest>>, error: &DispatchError) {
        for request in requests {
            self.op_stats.record(request.kind(), false);
            self.reorder
                .complete(&request.transform, request.ticket, Err(error.clone()));
        }
    }

    /// Derive an HMAC key from one longer than the hash block
    pub fn hmac_setkey(&self, transform: &Arc<TransformShared>, key: &[u8]) -> DispatchResult<()> {
        let hash = transform.algorithm.underlying_hash().ok_or_else(|| {
            DispatchError::InvalidRequest(format!("{} is not an HMAC transform", transform.algorithm))
        })?;
        if key.len() <= HMAC_MAX_DIRECT_KEY {
            transform.store_hmac_key(key.to_vec());
            return Ok(());
        }

        let waiter = Arc::new((Mutex::new(None), Condvar::new()));
        let signal = Arc::clone(&waiter);
        let request = CryptoRequest::digest(key.to_vec(), move |status| {
            if let RequestStatus::Done(result) = status {
                let (slot, ready) = &*signal;
                *slot.lock() = Some(result);
                ready.notify_all();
            }
        })
        .allow_backlog();
        self.submit(transform, request, hash)?;

        let (slot, ready) = &*waiter;
        let mut outcome = slot.lock();
        let digest = loop {
            if let Some(result) = outcome.take() {
                break result?;
            }
            ready.wait_for(&mut outcome, HMAC_WAIT_SLICE);
            if outcome.is_none() {
                self.ensure_running()?;
            }
        };
        debug!(
            "[REGISTRY] transform {} key digested from {} to {} bytes",
            transform.id,
            key.len(),
            digest.len()
        );
        transform.store_hmac_key(digest);
        Ok(())
    }
}

/// Completion path for one dispatched request
fn completion(
    engine: &Arc<Engine>,
    slot: SlotId,
    ticket: u64,
    reorder: &Arc<ReorderPipeline>,
    op_stats: &Arc<OperationCounters>,
) -> CompletionCallback {
    let engine = Arc::clone(engine);
    let reorder = Arc::clone(reorder);
    let op_stats = Arc::clone(op_stats);
    Box::new(move |result| {
        let request = {
            let mut pool = engine.pool.lock();
            let owned = pool.get(slot).map_or(false, |r| r.ticket == ticket);
            if owned {
                pool.release(slot)
            } else {
                None
            }
        };
        let Some(request) = request else {
            warn!(
                "[REORDER] completion for unknown request {} on {} slot {}",
                ticket,
                engine.id,
                slot.index()
            );
            return;
        };

        let outcome = match result {
            Ok(output) => {
                op_stats.record(request.kind(), true);
                Ok(output)
            }
            Err(e) => {
                op_stats.record(request.kind(), false);
                debug!("[REORDER] request {} failed on {}: {}", ticket, engine.id, e);
                Err(DispatchError::Hardware(e))
            }
        };
        reorder.complete(&request.transform, ticket, outcome);
    })
}

#[derive(Default)]
struct Workers {
    delivery: Option<WorkerThread>,
    bandwidth: Option<WorkerThread>,
    pollers: Vec<WorkerThread>,
}

/// Owner of the dispatch core
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use hwcrypto_config::DispatchConfig;
/// use hwcrypto_dispatch::{Algorithm, CryptoRequest, Direction, Registry};
/// use hwcrypto_hal::{EngineCapabilities, SimulatedEngine};
///
/// let registry = Registry::new(&DispatchConfig::default())?;
/// registry.attach_engine(Arc::new(SimulatedEngine::new(EngineCapabilities::default())), None)?;
///
/// let transform = registry.create_transform(Algorithm::AesCbc)?;
/// transform.set_key(&[0u8; 16])?;
/// registry.submit(
///     &transform,
///     CryptoRequest::new(Direction::Encrypt, vec![0u8; 32], |status| println!("{:?}", status)),
/// )?;
/// # Ok::<(), hwcrypto_dispatch::DispatchError>(())
/// ```
pub struct Registry {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(config: &DispatchConfig) -> DispatchResult<Self> {
        validate_config(config)?;

        let (reorder, delivery_rx) =
            ReorderPipeline::new(config.reorder.backlog_stop, config.reorder.backlog_start);
        let (bandwidth_tx, bandwidth_rx) = crossbeam::channel::unbounded();

        let shared = Arc::new_cyclic(|weak| Shared {
            self_ref: weak.clone(),
            settings: Settings {
                queue_len: config.queues.request_queue_length,
                static_assign: config.assignment.static_assign,
                poll_interval: config.polling.interval(),
                max_retry: config.polling.max_retry,
                default_cpu: config.polling.default_cpu,
            },
            engines: RwLock::new(Vec::new()),
            cursor: Mutex::new(0),
            next_unit: AtomicU32::new(0),
            next_ticket: AtomicU64::new(1),
            next_transform: AtomicU64::new(1),
            overflow: Mutex::new(RequestQueue::new(config.queues.request_queue_length)),
            max_qlen: AtomicUsize::new(0),
            req_drop_cnt: AtomicU64::new(0),
            pollers: RwLock::new(Vec::new()),
            reorder: Arc::clone(&reorder),
            op_stats: Arc::new(OperationCounters::default()),
            bandwidth: bandwidth_tx,
            running: AtomicBool::new(true),
        });

        let resume_target = Arc::downgrade(&shared);
        let delivery = WorkerThread::spawn(
            "hwcrypto-delivery".to_string(),
            delivery_rx,
            DeliveryLoop::new(reorder, move || {
                if let Some(shared) = resume_target.upgrade() {
                    shared.kick_pollers();
                }
            }),
        )?;
        let bandwidth = WorkerThread::spawn(
            "hwcrypto-bandwidth".to_string(),
            bandwidth_rx,
            BandwidthLoop::new(Arc::downgrade(&shared), config.bandwidth.idle_timeout()),
        )?;

        info!(
            "[REGISTRY] dispatch core started: queue length {}, watermarks {}/{}, poll {:?} x{}, idle timeout {:?}",
            config.queues.request_queue_length,
            config.reorder.backlog_stop,
            config.reorder.backlog_start,
            config.polling.interval(),
            config.polling.max_retry,
            config.bandwidth.idle_timeout(),
        );

        Ok(Self {
            shared,
            workers: Mutex::new(Workers {
                delivery: Some(delivery),
                bandwidth: Some(bandwidth),
                pollers: Vec::new(),
            }),
        })
    }

    /// Poll controller for `cpu`, started on first use
    fn poller_for(&self, cpu: usize) -> DispatchResult<Arc<PollController>> {
        if let Some(poller) = self.shared.pollers.read().iter().find(|p| p.cpu == cpu) {
            return Ok(Arc::clone(poller));
        }

        let mut pollers = self.shared.pollers.write();
        if let Some(poller) = pollers.iter().find(|p| p.cpu == cpu) {
            return Ok(Arc::clone(poller));
        }
        let settings = &self.shared.settings;
        let (controller, rx) =
            PollController::new(cpu, settings.poll_interval, settings.max_retry);
        let worker = WorkerThread::spawn(
            format!("hwcrypto-poll-{}", cpu),
            rx,
            PollLoop::new(Arc::clone(&controller), Arc::downgrade(&self.shared)),
        )?;
        self.workers.lock().pollers.push(worker);
        pollers.push(Arc::clone(&controller));
        debug!("[POLL] controller for cpu {} created", cpu);
        Ok(controller)
    }

    /// Register an engine; it is polled by the controller for `poll_cpu`
    /// (the configured default when `None`).
    pub fn attach_engine(
        &self,
        handle: Arc<dyn CryptoEngineHandle>,
        poll_cpu: Option<usize>,
    ) -> DispatchResult<EngineId> {
        self.shared.ensure_running()?;
        let cpu = poll_cpu.unwrap_or(self.shared.settings.default_cpu);
        let id = EngineId(self.shared.next_unit.fetch_add(1, Ordering::Relaxed));
        let engine = Arc::new(Engine::new(id, handle, self.shared.settings.queue_len, cpu));

        let controller = self.poller_for(cpu)?;
        engine.set_poller(&controller);
        controller.attach(Arc::clone(&engine));
        self.shared.engines.write().push(Arc::clone(&engine));

        if !engine.caps.bus_scaling {
            // never released, but still watched for stuck work
            self.shared
                .send_bandwidth(BandwidthJob::ArmReaper(Arc::clone(&engine)));
        }

        info!(
            "[REGISTRY] attached {} ({}) device {} instance {}: {} slots, poll cpu {}, {}",
            id,
            engine.name(),
            engine.device(),
            engine.hw_instance(),
            engine.caps.max_requests,
            cpu,
            engine.bandwidth(),
        );
        Ok(id)
    }

    /// Remove an engine; requests still queued on it fail with `NoDevice`
    ///
    /// Operations already on the hardware keep being polled and complete
    /// normally. The engine's poll controller drops it and releases its bus
    /// once the last of them has finished.
    pub fn detach_engine(&self, id: EngineId) -> DispatchResult<()> {
        let engine = {
            let mut engines = self.shared.engines.write();
            let index = engines
                .iter()
                .position(|e| e.id == id)
                .ok_or(DispatchError::NoDevice)?;
            let engine = engines.remove(index);
            let mut cursor = self.shared.cursor.lock();
            if *cursor > index {
                *cursor -= 1;
            }
            if *cursor >= engines.len() {
                *cursor = 0;
            }
            engine
        };

        let queued = {
            let mut state = engine.state.lock();
            engine.attached.store(false, Ordering::Release);
            state.queue.drain()
        };
        self.shared.send_bandwidth(BandwidthJob::CancelReaper(id));

        let in_flight = engine.req_count();
        if in_flight > 0 {
            info!("[REGISTRY] {} detached with {} requests in flight", id, in_flight);
        }
        if let Some(poller) = engine.poller() {
            poller.schedule();
        }

        let failed = queued.len();
        self.shared.fail_queued(queued, &DispatchError::NoDevice);
        info!(
            "[REGISTRY] detached {} ({}), {} queued requests failed",
            id,
            engine.name(),
            failed
        );
        Ok(())
    }

    /// New transform context; pinned round-robin when static assignment is on
    pub fn create_transform(&self, algorithm: Algorithm) -> DispatchResult<Transform> {
        self.shared.ensure_running()?;
        let engine = if self.shared.settings.static_assign {
            Some(self.shared.next_engine().ok_or(DispatchError::NoDevice)?)
        } else {
            None
        };
        let id = self.shared.next_transform.fetch_add(1, Ordering::Relaxed);
        if let Some(engine) = &engine {
            debug!("[REGISTRY] transform {} ({}) assigned to {}", id, algorithm, engine.id);
        }
        Ok(Transform::from_shared(Arc::new(TransformShared::new(
            id,
            algorithm,
            self.shared.self_ref.clone(),
            engine,
        ))))
    }

    /// Queue one request
    ///
    /// `Busy` when the target queue is full and the request does not allow
    /// backlog. Otherwise the request's continuation later receives exactly
    /// one final [`RequestStatus::Done`], in submission order per transform.
    pub fn submit(&self, transform: &Transform, request: CryptoRequest) -> DispatchResult<Submitted> {
        self.shared
            .submit(&transform.inner, request, transform.inner.algorithm)
    }

    /// Set an HMAC key, digesting it on the engine first when it exceeds
    /// the hash block size. Blocks the caller until that digest completes.
    pub fn hmac_setkey(&self, transform: &Transform, key: &[u8]) -> DispatchResult<()> {
        self.shared.hmac_setkey(&transform.inner, key)
    }

    pub fn suspend_engine(&self, id: EngineId) -> DispatchResult<()> {
        let engine = self.shared.engine_by_id(id)?;
        bandwidth::suspend(&self.shared, &engine)
    }

    pub fn resume_engine(&self, id: EngineId) -> DispatchResult<()> {
        let engine = self.shared.engine_by_id(id)?;
        bandwidth::resume(&engine)
    }

    pub fn engine_count(&self) -> usize {
        self.shared.engines.read().len()
    }

    pub fn engines(&self) -> Vec<EngineInfo> {
        self.shared
            .engines
            .read()
            .iter()
            .map(|e| EngineInfo::of(e))
            .collect()
    }

    pub fn engine_info(&self, id: EngineId) -> Option<EngineInfo> {
        self.shared.engine_by_id(id).ok().map(|e| EngineInfo::of(&e))
    }

    /// Engine on `device`, optionally matching a hardware instance
    pub fn find_engine(&self, device: u32, hw_instance: Option<u32>) -> Option<EngineId> {
        self.shared.find_engine(device, hw_instance).map(|e| e.id)
    }

    pub fn processing_status(&self) -> ProcessingStatus {
        self.shared.reorder.status()
    }

    /// Change the tick period of the controller for `cpu`; clamped to one second
    pub fn set_poll_interval(&self, cpu: usize, interval: Duration) -> DispatchResult<Duration> {
        let pollers = self.shared.pollers.read();
        let poller = pollers
            .iter()
            .find(|p| p.cpu == cpu)
            .ok_or(DispatchError::NoPollController)?;
        let applied = poller.set_interval(interval);
        info!("[POLL] cpu {} interval set to {:?}", cpu, applied);
        Ok(applied)
    }

    pub fn stats(&self) -> DispatchStats {
        let engines = self
            .shared
            .engines
            .read()
            .iter()
            .map(|engine| {
                let (queued, bandwidth) = {
                    let state = engine.state.lock();
                    (state.queue.len(), state.bandwidth)
                };
                let (active, max_active) = {
                    let pool = engine.pool.lock();
                    (pool.in_use(), pool.max_used())
                };
                EngineStats {
                    unit: engine.id.0,
                    name: engine.name().to_string(),
                    device: engine.device(),
                    hw_instance: engine.hw_instance(),
                    poll_cpu: engine.poll_cpu,
                    total_requests: engine.total_req.load(Ordering::Relaxed),
                    error_requests: engine.err_req.load(Ordering::Relaxed),
                    active,
                    max_active,
                    max_requests: engine.caps.max_requests,
                    queued,
                    bandwidth,
                }
            })
            .collect();

        let pollers = self
            .shared
            .pollers
            .read()
            .iter()
            .map(|poller| PollerStats {
                cpu: poller.cpu,
                polls: poller.polls(),
                schedules: poller.scheds(),
                state: poller.state().as_str().to_string(),
                interval_us: u64::try_from(poller.interval().as_micros()).unwrap_or(u64::MAX),
                engines: poller.engine_ids().iter().map(|id| id.0).collect(),
            })
            .collect();

        let reorder = self.shared.reorder.counters();
        DispatchStats {
            engines,
            pollers,
            processing: self.shared.reorder.status(),
            overflow_queued: self.shared.overflow.lock().len(),
            max_qlen: self.shared.max_qlen.load(Ordering::Relaxed),
            req_drop_cnt: self.shared.req_drop_cnt.load(Ordering::Relaxed),
            ready_depth: reorder.ready_depth,
            max_resp_qlen: reorder.max_resp_qlen,
            max_reorder_cnt: reorder.max_reorder_cnt,
            resp_stop: reorder.resp_stop,
            resp_start: reorder.resp_start,
            queue_complete_work: reorder.queue_complete_work,
            operations: self.shared.op_stats.snapshot(),
        }
    }

    pub fn reset_stats(&self) {
        let shared = &self.shared;
        shared.max_qlen.store(0, Ordering::Relaxed);
        shared.req_drop_cnt.store(0, Ordering::Relaxed);
        shared.op_stats.reset();
        shared.reorder.reset_counters();
        for engine in shared.engines.read().iter() {
            engine.total_req.store(0, Ordering::Relaxed);
            engine.err_req.store(0, Ordering::Relaxed);
            engine.pool.lock().reset_max_used();
        }
        for poller in shared.pollers.read().iter() {
            poller.reset_counters();
        }
        debug!("[REGISTRY] statistics reset");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop all workers. Queued requests fail with `ShutDown`; results
    /// already released are delivered before this returns.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("[REGISTRY] shutting down");

        for poller in self.shared.pollers.read().iter() {
            poller.stop();
        }
        let (pollers, bandwidth, delivery) = {
            let mut workers = self.workers.lock();
            (
                std::mem::take(&mut workers.pollers),
                workers.bandwidth.take(),
                workers.delivery.take(),
            )
        };
        for mut worker in pollers.into_iter().chain(bandwidth) {
            if worker.is_running() {
                debug!("[REGISTRY] stopping {}", worker.name());
            }
            worker.stop();
        }

        let mut queued = Vec::new();
        let mut in_flight = 0;
        for engine in self.shared.engines.read().iter() {
            queued.extend(engine.state.lock().queue.drain());
            in_flight += engine.req_count();
        }
        queued.extend(self.shared.overflow.lock().drain());
        self.shared.fail_queued(queued, &DispatchError::ShutDown);

        drop(delivery);
        // whatever the delivery worker left behind
        self.shared.reorder.drain_pass();

        if in_flight > 0 {
            warn!("[REGISTRY] shut down with {} requests in flight", in_flight);
        }
        info!("[REGISTRY] shutdown complete");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
