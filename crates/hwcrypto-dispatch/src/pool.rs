// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Request-control pool
//!
//! Fixed array of slots sized to the engine's concurrency. A slot binds one
//! in-flight operation to whatever the completion path needs to find its
//! response record again.

use tracing::warn;

/// Index of a slot within its engine's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct RequestPool<B> {
    slots: Vec<Option<B>>,
    in_use: usize,
    max_used: usize,
    double_releases: u64,
}

impl<B> RequestPool<B> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            in_use: 0,
            max_used: 0,
            double_releases: 0,
        }
    }

    /// Occupy the first free slot, or `None` when the pool is full
    pub fn acquire(&mut self, binding: B) -> Option<SlotId> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(binding);
        self.in_use += 1;
        if self.in_use > self.max_used {
            self.max_used = self.in_use;
        }
        Some(SlotId(index))
    }

    /// Free a slot and hand back its binding
    ///
    /// Releasing a free or out-of-range slot is logged and leaves the count
    /// untouched.
    pub fn release(&mut self, slot: SlotId) -> Option<B> {
        match self.slots.get_mut(slot.0).and_then(Option::take) {
            Some(binding) => {
                self.in_use -= 1;
                Some(binding)
            }
            None => {
                self.double_releases += 1;
                warn!("[POOL] release of free request slot {}", slot.0);
                None
            }
        }
    }

    /// Locate the slot whose binding satisfies `pred`
    pub fn find<P>(&self, pred: P) -> Option<SlotId>
    where
        P: Fn(&B) -> bool,
    {
        self.slots
            .iter()
            .position(|s| s.as_ref().map_or(false, &pred))
            .map(SlotId)
    }

    pub fn get(&self, slot: SlotId) -> Option<&B> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn free(&self) -> usize {
        self.slots.len() - self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest simultaneous occupancy since creation or the last reset
    pub fn max_used(&self) -> usize {
        self.max_used
    }

    pub fn double_releases(&self) -> u64 {
        self.double_releases
    }

    pub fn reset_max_used(&mut self) {
        self.max_used = self.in_use;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_full() {
        let mut pool = RequestPool::new(2);
        let a = pool.acquire("a").unwrap();
        let b = pool.acquire("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.acquire("c"), None);
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.free(), 0);
    }

    #[test]
    fn test_release_reuses_lowest_slot() {
        let mut pool = RequestPool::new(3);
        let a = pool.acquire(1).unwrap();
        pool.acquire(2).unwrap();
        assert_eq!(pool.release(a), Some(1));
        assert_eq!(pool.acquire(3), Some(a));
        assert_eq!(pool.max_used(), 2);
    }

    #[test]
    fn test_double_release_keeps_count() {
        let mut pool = RequestPool::new(2);
        let a = pool.acquire(1).unwrap();
        assert_eq!(pool.release(a), Some(1));
        assert_eq!(pool.release(a), None);
        assert_eq!(pool.release(a), None);
        assert_eq!(pool.release(SlotId(99)), None);

        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.double_releases(), 3);
        assert!(pool.acquire(2).is_some());
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_find_by_binding() {
        let mut pool = RequestPool::new(4);
        pool.acquire(10u64).unwrap();
        let b = pool.acquire(20u64).unwrap();
        assert_eq!(pool.find(|t| *t == 20), Some(b));
        assert_eq!(pool.get(b), Some(&20));
        assert_eq!(pool.find(|t| *t == 30), None);
    }

    #[test]
    fn test_reset_max_used() {
        let mut pool = RequestPool::new(4);
        let a = pool.acquire(()).unwrap();
        pool.acquire(()).unwrap();
        pool.release(a);
        pool.reset_max_used();
        assert_eq!(pool.max_used(), 1);
    }
}
