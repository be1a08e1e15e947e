// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Named background worker threads
//!
//! Every deferred context (bandwidth handshakes, polling, completion
//! delivery) runs on one of these: a dedicated thread pulling items from a
//! channel, with graceful shutdown through an atomic flag and a join on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error};

use crate::error::{DispatchError, DispatchResult};

/// Wait used when a worker has no timer of its own
pub(crate) const DEFAULT_WAIT: Duration = Duration::from_millis(100);

/// Body of a worker thread
pub(crate) trait WorkerLoop: Send + 'static {
    type Item: Send + 'static;

    fn handle(&mut self, item: Self::Item);

    /// Runs after every wakeup, item or timeout. Returns how long the thread
    /// may block before it must run again.
    fn on_wake(&mut self, _now: Instant) -> Duration {
        DEFAULT_WAIT
    }

    /// Runs once when the thread exits
    fn on_exit(&mut self) {}
}

pub(crate) struct WorkerThread {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    name: String,
}

impl WorkerThread {
    pub fn spawn<L: WorkerLoop>(
        name: String,
        rx: Receiver<L::Item>,
        mut body: L,
    ) -> DispatchResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let name_clone = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!("[WORKER:{}] started", name_clone);
                let mut wait = body.on_wake(Instant::now());
                while !shutdown_clone.load(Ordering::Acquire) {
                    match rx.recv_timeout(wait) {
                        Ok(item) => body.handle(item),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    wait = body.on_wake(Instant::now()).min(DEFAULT_WAIT);
                }
                body.on_exit();
                debug!("[WORKER:{}] stopped", name_clone);
            })
            .map_err(|e| DispatchError::Spawn(format!("{}: {}", name, e)))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            name,
        })
    }

    /// Signal the worker to stop and wait for it to finish
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                // stopping from inside the worker itself; it exits on its own
                return;
            }
            if let Err(e) = handle.join() {
                error!("[WORKER:{}] join error: {:?}", self.name, e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
            && self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::atomic::AtomicUsize;

    struct Summer(Arc<AtomicUsize>);

    impl WorkerLoop for Summer {
        type Item = usize;

        fn handle(&mut self, item: usize) {
            self.0.fetch_add(item, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_worker_thread() {
        let (tx, rx) = channel::unbounded();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut worker =
            WorkerThread::spawn("test-worker".to_string(), rx, Summer(Arc::clone(&counter)))
                .unwrap();
        assert!(worker.is_running());
        assert_eq!(worker.name(), "test-worker");

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) != 6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 6);

        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_disconnect_ends_worker() {
        let (tx, rx) = channel::unbounded::<usize>();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut worker =
            WorkerThread::spawn("test-disconnect".to_string(), rx, Summer(counter)).unwrap();
        drop(tx);
        worker.stop();
        assert!(!worker.is_running());
    }
}
