// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hwcrypto-dispatch
//!
//! Request dispatch core for hardware crypto engines.
//!
//! Callers submit cipher, hash and AEAD requests against a [`Transform`].
//! The [`Registry`] spreads transforms over the attached engines, queues
//! requests per engine (or on a shared overflow queue), brings each
//! engine's bus bandwidth and clock up on demand and back down when idle,
//! polls engines for completions, and delivers results to every transform
//! in the order its requests were submitted.
//!
//! ## Threads
//! - one poll controller thread per CPU named at attach, pinned to that CPU
//! - one bandwidth worker running allocations and idle reapers
//! - one delivery worker running completion continuations
//!
//! ## Backpressure
//! - a full queue rejects with [`DispatchError::Busy`] unless the request
//!   allows backlog, in which case it is accepted and later told
//!   [`RequestStatus::InProgress`]
//! - a deep ready queue pauses dispatch ([`ProcessingStatus::Stopped`])
//!   until delivery catches up

mod affinity;
mod bandwidth;
pub mod engine;
pub mod error;
mod poller;
pub mod pool;
pub mod queue;
pub mod registry;
mod reorder;
pub mod request;
pub mod schedule;
pub mod stats;
pub mod timer;
pub mod transform;
mod worker;

pub use engine::{BandwidthState, EngineId};
pub use error::{DispatchError, DispatchResult, ErrorClass};
pub use registry::{EngineInfo, Registry};
pub use reorder::ProcessingStatus;
pub use request::{CompletionFn, CryptoRequest, RequestStatus, Submitted};
pub use schedule::{ScheduleFlag, ScheduleState};
pub use stats::{DispatchStats, EngineStats, OperationStats, PollerStats};
pub use transform::{ContextFlags, Transform};

pub use hwcrypto_hal::{Algorithm, Direction, OperationKind};
