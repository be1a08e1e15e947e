// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded request queue with a backlog region
//!
//! Entries accepted past `max_len` (only when the caller allows backlog) sit
//! in a backlog region at the tail. Each dequeue promotes the first backlog
//! entry, which the caller must then notify that its request is in progress.

use std::collections::VecDeque;

use crate::request::Submitted;

#[derive(Debug)]
pub struct RequestQueue<T> {
    entries: VecDeque<T>,
    max_len: usize,
    /// Number of tail entries still in the backlog region
    backlog: usize,
}

impl<T: Clone> RequestQueue<T> {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            backlog: 0,
        }
    }

    /// Append an entry
    ///
    /// A full queue hands the entry back unless `may_backlog` is set, in which
    /// case it is kept and reported as [`Submitted::Backlogged`].
    pub fn enqueue(&mut self, entry: T, may_backlog: bool) -> Result<Submitted, T> {
        if self.entries.len() >= self.max_len {
            if !may_backlog {
                return Err(entry);
            }
            self.entries.push_back(entry);
            self.backlog += 1;
            return Ok(Submitted::Backlogged);
        }
        self.entries.push_back(entry);
        Ok(Submitted::Queued)
    }

    /// Remove the head entry
    ///
    /// The second element is the entry that just left the backlog region, if
    /// any; it may be the returned head itself.
    pub fn dequeue(&mut self) -> Option<(T, Option<T>)> {
        let promoted = if self.backlog > 0 {
            let index = self.entries.len() - self.backlog;
            self.backlog -= 1;
            self.entries.get(index).cloned()
        } else {
            None
        };
        let head = self.entries.pop_front()?;
        Some((head, promoted))
    }

    /// Remove everything, for teardown
    pub fn drain(&mut self) -> Vec<T> {
        self.backlog = 0;
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
