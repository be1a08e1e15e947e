// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Response reorder pipeline
//!
//! Engines finish work in any order. Each transform keeps its response
//! records in submission order; a completion resolves its record and then
//! moves the resolved prefix of that list onto one global ready queue. A
//! single delivery worker drains the ready queue and runs continuations.
//!
//! The ready depth also drives backpressure: reaching `backlog_stop` flips
//! the processing status to `Stopped` (engines stop taking new work) and
//! draining below `backlog_start` flips it back.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::request::{CompletionFn, RequestStatus};
use crate::schedule::ScheduleFlag;
use crate::transform::TransformShared;
use crate::worker::WorkerLoop;

/// Whether engines may take new work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessingStatus {
    InProgress = 0,
    Stopped = 1,
}

impl ProcessingStatus {
    fn from_u8(value: u8) -> Self {
        if value == ProcessingStatus::Stopped as u8 {
            ProcessingStatus::Stopped
        } else {
            ProcessingStatus::InProgress
        }
    }
}

pub(crate) type Outcome = Result<Vec<u8>, DispatchError>;

struct ReadyResponse {
    on_complete: CompletionFn,
    outcome: Outcome,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReorderCounters {
    pub ready_depth: usize,
    pub max_resp_qlen: usize,
    pub max_reorder_cnt: usize,
    pub resp_stop: u64,
    pub resp_start: u64,
    pub queue_complete_work: u64,
}

pub(crate) struct ReorderPipeline {
    ready: SegQueue<ReadyResponse>,
    resp_cnt: AtomicUsize,
    status: AtomicU8,
    delivery: ScheduleFlag,
    wake: Sender<()>,
    backlog_stop: usize,
    backlog_start: usize,
    max_resp_qlen: AtomicUsize,
    max_reorder_cnt: AtomicUsize,
    resp_stop: AtomicU64,
    resp_start: AtomicU64,
    queue_complete_work: AtomicU64,
}

impl ReorderPipeline {
    /// Returns the pipeline and the receiving end of its delivery wakeups
    pub fn new(backlog_stop: usize, backlog_start: usize) -> (Arc<Self>, Receiver<()>) {
        let (wake, rx) = crossbeam::channel::unbounded();
        let pipeline = Arc::new(Self {
            ready: SegQueue::new(),
            resp_cnt: AtomicUsize::new(0),
            status: AtomicU8::new(ProcessingStatus::InProgress as u8),
            delivery: ScheduleFlag::new(),
            wake,
            backlog_stop,
            backlog_start,
            max_resp_qlen: AtomicUsize::new(0),
            max_reorder_cnt: AtomicUsize::new(0),
            resp_stop: AtomicU64::new(0),
            resp_start: AtomicU64::new(0),
            queue_complete_work: AtomicU64::new(0),
        });
        (pipeline, rx)
    }

    pub fn status(&self) -> ProcessingStatus {
        ProcessingStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == ProcessingStatus::Stopped
    }

    fn transition(&self, from: ProcessingStatus, to: ProcessingStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record the final outcome of `ticket` and release whatever became
    /// deliverable on that transform.
    pub fn complete(&self, transform: &TransformShared, ticket: u64, outcome: Outcome) {
        let released = {
            let mut responses = transform.responses.lock();
            let index = responses.binary_search_by_key(&ticket, |r| r.ticket).ok();
            match index.and_then(|i| responses.get_mut(i)) {
                Some(record) if record.outcome.is_none() => record.outcome = Some(outcome),
                Some(_) => {
                    warn!(
                        "[REORDER] duplicate completion for request {} on transform {}",
                        ticket, transform.id
                    );
                    return;
                }
                None => {
                    warn!(
                        "[REORDER] completion for unknown request {} on transform {}",
                        ticket, transform.id
                    );
                    return;
                }
            }

            let mut released = 0usize;
            while responses.front().map_or(false, |r| r.outcome.is_some()) {
                let Some(record) = responses.pop_front() else {
                    break;
                };
                let Some(outcome) = record.outcome else {
                    break;
                };
                // counted before it becomes visible to the delivery side
                self.resp_cnt.fetch_add(1, Ordering::AcqRel);
                self.ready.push(ReadyResponse {
                    on_complete: record.on_complete,
                    outcome,
                });
                released += 1;
            }
            released
        };

        if released == 0 {
            return;
        }

        let depth = self.resp_cnt.load(Ordering::Acquire);
        self.max_resp_qlen.fetch_max(depth, Ordering::Relaxed);
        self.max_reorder_cnt.fetch_max(released, Ordering::Relaxed);
        if depth >= self.backlog_stop
            && self.transition(ProcessingStatus::InProgress, ProcessingStatus::Stopped)
        {
            self.resp_stop.fetch_add(1, Ordering::Relaxed);
            debug!("[REORDER] ready depth {} reached high water, dispatch paused", depth);
        }

        self.schedule();
    }

    /// Arm the delivery worker if there is anything to deliver
    ///
    /// While stopped it arms the worker even with nothing ready, so a pass
    /// that raced the stop still gets to flip the status back.
    pub fn schedule(&self) {
        if self.ready.is_empty() && !self.is_stopped() {
            return;
        }
        if self.delivery.request() {
            self.queue_complete_work.fetch_add(1, Ordering::Relaxed);
            if self.wake.send(()).is_err() {
                // delivery worker gone (shutdown); nothing will drain
                self.delivery.reset();
            }
        }
    }

    /// Deliver everything currently ready, in queue order.
    ///
    /// Returns `true` if this pass moved the status from `Stopped` back to
    /// `InProgress`.
    pub fn drain_pass(&self) -> bool {
        let mut resumed = false;
        while let Some(response) = self.ready.pop() {
            let depth = self.resp_cnt.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            (response.on_complete)(RequestStatus::Done(response.outcome));
            if depth < self.backlog_start {
                resumed |= self.resume(depth);
            }
        }
        let depth = self.ready_depth();
        if depth < self.backlog_start {
            resumed |= self.resume(depth);
        }
        resumed
    }

    fn resume(&self, depth: usize) -> bool {
        if !self.transition(ProcessingStatus::Stopped, ProcessingStatus::InProgress) {
            return false;
        }
        self.resp_start.fetch_add(1, Ordering::Relaxed);
        debug!("[REORDER] ready depth {} under low water, dispatch resumed", depth);
        true
    }

    /// Delivery runner is out of work; `false` means drain again
    pub fn finish_delivery(&self) -> bool {
        self.delivery.try_finish()
    }

    pub fn ready_depth(&self) -> usize {
        self.resp_cnt.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> ReorderCounters {
        ReorderCounters {
            ready_depth: self.ready_depth(),
            max_resp_qlen: self.max_resp_qlen.load(Ordering::Relaxed),
            max_reorder_cnt: self.max_reorder_cnt.load(Ordering::Relaxed),
            resp_stop: self.resp_stop.load(Ordering::Relaxed),
            resp_start: self.resp_start.load(Ordering::Relaxed),
            queue_complete_work: self.queue_complete_work.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        self.max_resp_qlen.store(0, Ordering::Relaxed);
        self.max_reorder_cnt.store(0, Ordering::Relaxed);
        self.resp_stop.store(0, Ordering::Relaxed);
        self.resp_start.store(0, Ordering::Relaxed);
        self.queue_complete_work.store(0, Ordering::Relaxed);
    }
}

/// Body of the delivery worker
pub(crate) struct DeliveryLoop {
    pipeline: Arc<ReorderPipeline>,
    on_resume: Box<dyn Fn() + Send>,
}

impl DeliveryLoop {
    pub fn new<F>(pipeline: Arc<ReorderPipeline>, on_resume: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        Self {
            pipeline,
            on_resume: Box::new(on_resume),
        }
    }
}

impl WorkerLoop for DeliveryLoop {
    type Item = ();

    fn handle(&mut self, _wake: ()) {
        loop {
            if self.pipeline.drain_pass() {
                (self.on_resume)();
            }
            if self.pipeline.finish_delivery() {
                break;
            }
        }
    }
}
