// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Caller-facing request descriptors and completion signalling

use std::fmt;
use std::sync::Arc;

use hwcrypto_hal::{Direction, HwOperation, OperationKind};

use crate::error::{DispatchError, DispatchResult};
use crate::transform::TransformShared;

/// Status reported to a request's completion function
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    /// A backlogged request has moved into the regular queue
    InProgress,
    /// Final result; reported exactly once per accepted request
    Done(Result<Vec<u8>, DispatchError>),
}

impl RequestStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, RequestStatus::Done(_))
    }
}

/// Completion continuation. Runs on the delivery thread, or on the
/// dispatching thread for in-progress notices.
pub type CompletionFn = Arc<dyn Fn(RequestStatus) + Send + Sync>;

/// How an accepted request entered the queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    /// Accepted past queue capacity; an `InProgress` notice follows once it
    /// leaves the backlog region
    Backlogged,
}

/// One cipher, hash or AEAD operation
///
/// ```rust
/// use hwcrypto_dispatch::{CryptoRequest, Direction};
///
/// let request = CryptoRequest::new(Direction::Encrypt, b"plaintext".to_vec(), |_status| {})
///     .with_iv(vec![0u8; 16])
///     .allow_backlog();
/// assert!(request.may_backlog());
/// ```
pub struct CryptoRequest {
    pub(crate) direction: Direction,
    pub(crate) data: Vec<u8>,
    pub(crate) iv: Vec<u8>,
    pub(crate) assoc: Vec<u8>,
    pub(crate) may_backlog: bool,
    pub(crate) on_complete: CompletionFn,
}

impl CryptoRequest {
    pub fn new<F>(direction: Direction, data: Vec<u8>, on_complete: F) -> Self
    where
        F: Fn(RequestStatus) + Send + Sync + 'static,
    {
        Self {
            direction,
            data,
            iv: Vec::new(),
            assoc: Vec::new(),
            may_backlog: false,
            on_complete: Arc::new(on_complete),
        }
    }

    /// Hash request; direction is meaningless for digests
    pub fn digest<F>(data: Vec<u8>, on_complete: F) -> Self
    where
        F: Fn(RequestStatus) + Send + Sync + 'static,
    {
        Self::new(Direction::Encrypt, data, on_complete)
    }

    pub fn with_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv = iv;
        self
    }

    /// Associated data for AEAD requests
    pub fn with_assoc(mut self, assoc: Vec<u8>) -> Self {
        self.assoc = assoc;
        self
    }

    /// Accept the request even when the target queue is full
    pub fn allow_backlog(mut self) -> Self {
        self.may_backlog = true;
        self
    }

    pub fn may_backlog(&self) -> bool {
        self.may_backlog
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Reject lengths the engine cannot express
    pub(crate) fn check_lengths(&self) -> DispatchResult<()> {
        let total = self
            .data
            .len()
            .checked_add(self.assoc.len())
            .ok_or(DispatchError::LengthOverflow)?;
        u32::try_from(total).map_err(|_| DispatchError::LengthOverflow)?;
        Ok(())
    }
}

impl fmt::Debug for CryptoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoRequest")
            .field("direction", &self.direction)
            .field("data_len", &self.data.len())
            .field("assoc_len", &self.assoc.len())
            .field("may_backlog", &self.may_backlog)
            .finish()
    }
}

/// A request accepted into a queue, waiting for or occupying a slot
pub(crate) struct PendingRequest {
    pub ticket: u64,
    pub transform: Arc<TransformShared>,
    pub operation: HwOperation,
    pub on_complete: CompletionFn,
}

impl PendingRequest {
    pub fn kind(&self) -> OperationKind {
        self.operation.algorithm.kind()
    }

    pub fn notify_in_progress(&self) {
        (self.on_complete)(RequestStatus::InProgress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let request = CryptoRequest::new(Direction::Decrypt, vec![1, 2, 3], |_| {})
            .with_assoc(vec![9; 4])
            .with_iv(vec![0; 16]);
        assert_eq!(request.direction(), Direction::Decrypt);
        assert!(!request.may_backlog());
        assert!(request.check_lengths().is_ok());
    }

    #[test]
    fn test_status_finality() {
        assert!(!RequestStatus::InProgress.is_final());
        assert!(RequestStatus::Done(Ok(Vec::new())).is_final());
    }
}
