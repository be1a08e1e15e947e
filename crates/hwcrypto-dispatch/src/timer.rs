// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Re-armable one-shot timers keyed by owner
//!
//! Pure bookkeeping: the owning worker asks for the next deadline, sleeps
//! until then (or until new work arrives) and pops whatever expired.

use std::hash::Hash;
use std::time::{Duration, Instant};

use ahash::AHashMap;

#[derive(Debug)]
pub struct TimerQueue<K, V> {
    timers: AHashMap<K, (Instant, V)>,
}

impl<K, V> Default for TimerQueue<K, V>
where
    K: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TimerQueue<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self {
            timers: AHashMap::new(),
        }
    }

    /// Arm (or re-arm) the timer for `key`; an existing deadline is replaced
    pub fn arm(&mut self, key: K, after: Duration, value: V, now: Instant) {
        self.timers.insert(key, (now + after, value));
    }

    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.timers.remove(key).map(|(_, value)| value)
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|(deadline, _)| *deadline).min()
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(K, V)> {
        let due: Vec<K> = self
            .timers
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        let mut expired: Vec<(Instant, K, V)> = due
            .into_iter()
            .filter_map(|key| {
                self.timers
                    .remove(&key)
                    .map(|(deadline, value)| (deadline, key, value))
            })
            .collect();
        expired.sort_by_key(|(deadline, _, _)| *deadline);
        expired.into_iter().map(|(_, key, value)| (key, value)).collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}
