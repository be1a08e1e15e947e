// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tri-state schedule flag for single-runner background tasks
//!
//! Producers publish work first and then call [`ScheduleFlag::request`]. At
//! most one runner is active at a time. A request that lands while the runner
//! is active marks `ScheduleAgain`, and the runner's
//! [`ScheduleFlag::try_finish`] then refuses to go idle, so work published
//! during a drain is never stranded.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScheduleState {
    Idle = 0,
    Scheduled = 1,
    ScheduleAgain = 2,
}

impl ScheduleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScheduleState::Scheduled,
            2 => ScheduleState::ScheduleAgain,
            _ => ScheduleState::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleState::Idle => "idle",
            ScheduleState::Scheduled => "scheduled",
            ScheduleState::ScheduleAgain => "schedule-again",
        }
    }
}

#[derive(Debug)]
pub struct ScheduleFlag(AtomicU8);

impl Default for ScheduleFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(ScheduleState::Idle as u8))
    }

    pub fn state(&self) -> ScheduleState {
        ScheduleState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn cas(&self, from: ScheduleState, to: ScheduleState) -> Result<(), ScheduleState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ScheduleState::from_u8)
    }

    /// Ask for a run.
    ///
    /// Returns `true` exactly when the caller moved the flag from idle and
    /// must start (wake) the runner.
    pub fn request(&self) -> bool {
        loop {
            match self.cas(ScheduleState::Idle, ScheduleState::Scheduled) {
                Ok(()) => return true,
                Err(ScheduleState::ScheduleAgain) => return false,
                Err(_) => {}
            }
            match self.cas(ScheduleState::Scheduled, ScheduleState::ScheduleAgain) {
                Ok(()) | Err(ScheduleState::ScheduleAgain) => return false,
                // runner went idle in between; retry the idle edge
                Err(_) => continue,
            }
        }
    }

    /// Runner is out of work.
    ///
    /// Returns `true` if the flag is now idle and the runner may stop. If a
    /// request arrived meanwhile the flag goes back to `Scheduled` and the
    /// runner must drain again.
    pub fn try_finish(&self) -> bool {
        loop {
            match self.cas(ScheduleState::Scheduled, ScheduleState::Idle) {
                Ok(()) | Err(ScheduleState::Idle) => return true,
                Err(_) => {}
            }
            if self
                .cas(ScheduleState::ScheduleAgain, ScheduleState::Scheduled)
                .is_ok()
            {
                return false;
            }
        }
    }

    /// Force the flag idle, for teardown.
    pub fn reset(&self) {
        self.0.store(ScheduleState::Idle as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_request_starts_runner() {
        let flag = ScheduleFlag::new();
        assert!(flag.request());
        assert_eq!(flag.state(), ScheduleState::Scheduled);
        assert!(!flag.request());
        assert_eq!(flag.state(), ScheduleState::ScheduleAgain);
        assert!(!flag.request());
    }

    #[test]
    fn test_finish_with_pending_request_runs_again() {
        let flag = ScheduleFlag::new();
        assert!(flag.request());
        assert!(!flag.request());

        assert!(!flag.try_finish());
        assert_eq!(flag.state(), ScheduleState::Scheduled);
        assert!(flag.try_finish());
        assert_eq!(flag.state(), ScheduleState::Idle);

        assert!(flag.request());
    }

    #[test]
    fn test_no_lost_wakeup_under_contention() {
        // producers bump `published` then request; a runner loop drains into
        // `consumed`. Every published item must be consumed once all
        // producers are done and the last runner finished.
        let flag = Arc::new(ScheduleFlag::new());
        let published = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let run = {
            let flag = Arc::clone(&flag);
            let published = Arc::clone(&published);
            let consumed = Arc::clone(&consumed);
            let runs = Arc::clone(&runs);
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                loop {
                    consumed.store(published.load(Ordering::SeqCst), Ordering::SeqCst);
                    if flag.try_finish() {
                        break;
                    }
                }
            }
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let flag = Arc::clone(&flag);
                let published = Arc::clone(&published);
                let run = run.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        published.fetch_add(1, Ordering::SeqCst);
                        if flag.request() {
                            run();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(flag.state(), ScheduleState::Idle);
        assert_eq!(consumed.load(Ordering::SeqCst), 4000);
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }
}
