// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/// Simulated Crypto Engine
///
/// Behaves like a polled crypto engine without touching hardware:
/// - rejects work while its clock is off
/// - refuses more than `max_requests` concurrent operations
/// - holds every accepted operation until it is released, either by
///   `poll_for_completion` (in [`CompletionMode::OnPoll`]) or explicitly by
///   id, which lets tests finish operations in any order
/// - records clock, bandwidth and power events for inspection
///
/// The transformation applied to data is a keyed byte mix, not a real cipher.
/// It is reversible for ciphers and deterministic for digests and tags, which
/// is all the dispatch layer needs to observe.
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::hal::*;
use crate::HalError;

/// When accepted operations finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Every poll completes all in-flight operations in submission order
    OnPoll,
    /// Operations finish only through `complete` / `fail`
    Manual,
}

/// Recorded side effects, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    ClockEnabled,
    ClockDisabled,
    Bandwidth(BandwidthLevel),
    Submitted(u64),
    Completed(u64),
    Suspended,
    Resumed,
}

struct InFlight {
    id: u64,
    op: HwOperation,
    done: CompletionCallback,
}

struct SimState {
    mode: CompletionMode,
    clock_enabled: bool,
    bandwidth: BandwidthLevel,
    in_flight: Vec<InFlight>,
    next_id: u64,
    submitted: u64,
    peak_in_flight: usize,
    events: Vec<SimEvent>,
    fail_bandwidth: bool,
    fail_clock_disable: bool,
    reject_submissions: bool,
}

pub struct SimulatedEngine {
    name: String,
    caps: EngineCapabilities,
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    /// Engine that completes work whenever it is polled
    pub fn new(caps: EngineCapabilities) -> Self {
        Self::with_mode(caps, CompletionMode::OnPoll)
    }

    /// Engine whose operations finish only when a test releases them
    pub fn manual(caps: EngineCapabilities) -> Self {
        Self::with_mode(caps, CompletionMode::Manual)
    }

    pub fn with_mode(caps: EngineCapabilities, mode: CompletionMode) -> Self {
        // without bus scaling the clock is never switched off
        let clock_enabled = !caps.bus_scaling;
        Self {
            name: format!("sim-ce{}.{}", caps.device_id, caps.hw_instance),
            caps,
            state: Mutex::new(SimState {
                mode,
                clock_enabled,
                bandwidth: BandwidthLevel::Low,
                in_flight: Vec::new(),
                next_id: 1,
                submitted: 0,
                peak_in_flight: 0,
                events: Vec::new(),
                fail_bandwidth: false,
                fail_clock_disable: false,
                reject_submissions: false,
            }),
        }
    }

    pub fn set_mode(&self, mode: CompletionMode) {
        self.state.lock().mode = mode;
    }

    /// Ids of accepted, unfinished operations in submission order
    pub fn in_flight_ids(&self) -> Vec<u64> {
        self.state.lock().in_flight.iter().map(|f| f.id).collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Highest number of operations ever in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().peak_in_flight
    }

    pub fn submitted_count(&self) -> u64 {
        self.state.lock().submitted
    }

    /// Copy of an in-flight operation
    pub fn operation(&self, id: u64) -> Option<HwOperation> {
        self.state
            .lock()
            .in_flight
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.op.clone())
    }

    pub fn clock_enabled(&self) -> bool {
        self.state.lock().clock_enabled
    }

    pub fn bandwidth_level(&self) -> BandwidthLevel {
        self.state.lock().bandwidth
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Make every bandwidth vote fail
    pub fn set_fail_bandwidth(&self, fail: bool) {
        self.state.lock().fail_bandwidth = fail;
    }

    /// Make clock disable fail while leaving the clock running
    pub fn set_fail_clock_disable(&self, fail: bool) {
        self.state.lock().fail_clock_disable = fail;
    }

    /// Reject new submissions at the hardware boundary
    pub fn set_reject_submissions(&self, reject: bool) {
        self.state.lock().reject_submissions = reject;
    }

    /// Finish one operation successfully. Returns false for unknown ids.
    pub fn complete(&self, id: u64) -> bool {
        let Some(flight) = self.take(id) else {
            return false;
        };
        let result = process(&flight.op);
        (flight.done)(result);
        true
    }

    /// Finish one operation with an error. Returns false for unknown ids.
    pub fn fail(&self, id: u64, error: HalError) -> bool {
        let Some(flight) = self.take(id) else {
            return false;
        };
        (flight.done)(Err(error));
        true
    }

    /// Finish every in-flight operation in submission order
    pub fn complete_all(&self) -> usize {
        let drained: Vec<InFlight> = {
            let mut state = self.state.lock();
            let drained: Vec<InFlight> = state.in_flight.drain(..).collect();
            for flight in &drained {
                state.events.push(SimEvent::Completed(flight.id));
            }
            drained
        };
        let count = drained.len();
        // callbacks run without the engine lock held
        for flight in drained {
            let result = process(&flight.op);
            (flight.done)(result);
        }
        count
    }

    fn take(&self, id: u64) -> Option<InFlight> {
        let mut state = self.state.lock();
        let index = state.in_flight.iter().position(|f| f.id == id)?;
        state.events.push(SimEvent::Completed(id));
        Some(state.in_flight.remove(index))
    }
}

impl CryptoEngineHandle for SimulatedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.caps.clone()
    }

    fn submit_operation(&self, op: HwOperation, done: CompletionCallback) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if !state.clock_enabled {
            return Err(HalError::ClockDisabled);
        }
        if state.reject_submissions {
            return Err(HalError::Rejected("submissions disabled".to_string()));
        }
        if state.in_flight.len() >= self.caps.max_requests {
            return Err(HalError::DeviceBusy {
                in_flight: state.in_flight.len(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.submitted += 1;
        trace!("[SIM-ENGINE] {} accepted op {} ({})", self.name, id, op.algorithm);
        state.in_flight.push(InFlight { id, op, done });
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight.len());
        state.events.push(SimEvent::Submitted(id));
        Ok(())
    }

    fn poll_for_completion(&self) -> usize {
        if self.state.lock().mode == CompletionMode::Manual {
            return 0;
        }
        self.complete_all()
    }

    fn enable_clock(&self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.clock_enabled = true;
        state.events.push(SimEvent::ClockEnabled);
        Ok(())
    }

    fn disable_clock(&self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_clock_disable {
            return Err(HalError::ClockFailure("clock stuck on".to_string()));
        }
        state.clock_enabled = false;
        state.events.push(SimEvent::ClockDisabled);
        Ok(())
    }

    fn request_bandwidth(&self, level: BandwidthLevel) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_bandwidth {
            return Err(HalError::BandwidthVote(format!("{:?} vote refused", level)));
        }
        debug!("[SIM-ENGINE] {} bandwidth -> {:?}", self.name, level);
        state.bandwidth = level;
        state.events.push(SimEvent::Bandwidth(level));
        Ok(())
    }

    fn suspend(&self) -> Result<(), HalError> {
        self.state.lock().events.push(SimEvent::Suspended);
        Ok(())
    }

    fn resume(&self) -> Result<(), HalError> {
        self.state.lock().events.push(SimEvent::Resumed);
        Ok(())
    }
}

fn mix(data: &[u8], key: &[u8], iv: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, b)| {
            let k = if key.is_empty() { 0 } else { key[i % key.len()] };
            let v = if iv.is_empty() { 0 } else { iv[i % iv.len()] };
            b ^ k ^ v ^ 0x5a
        })
        .collect()
}

fn fold(parts: &[&[u8]], size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size.max(1)];
    let width = out.len();
    for (i, b) in parts.iter().flat_map(|p| p.iter()).enumerate() {
        let slot = &mut out[i % width];
        *slot = slot.wrapping_mul(31).wrapping_add(*b);
    }
    out.truncate(size);
    out
}

fn process(op: &HwOperation) -> HwResult {
    match op.algorithm.kind() {
        OperationKind::Cipher => Ok(mix(&op.data, &op.key, &op.iv)),
        OperationKind::Hash => {
            let size = op.algorithm.digest_size().unwrap_or(16);
            Ok(fold(&[&op.auth_key, &op.key, &op.data], size))
        }
        OperationKind::Aead => match op.direction {
            Direction::Encrypt => {
                let mut out = mix(&op.data, &op.key, &op.iv);
                let tag = fold(&[&op.auth_key, &op.assoc, &out], op.auth_size);
                out.extend_from_slice(&tag);
                Ok(out)
            }
            Direction::Decrypt => {
                if op.data.len() < op.auth_size {
                    return Err(HalError::Rejected("input shorter than tag".to_string()));
                }
                let (ct, tag) = op.data.split_at(op.data.len() - op.auth_size);
                if fold(&[&op.auth_key, &op.assoc, ct], op.auth_size) != tag {
                    return Err(HalError::AuthFailure);
                }
                Ok(mix(ct, &op.key, &op.iv))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(algorithm: Algorithm, direction: Direction, data: &[u8]) -> HwOperation {
        HwOperation {
            algorithm,
            direction,
            key: vec![7; 16],
            auth_key: vec![3; 20],
            use_hw_key: false,
            iv: vec![1; 16],
            assoc: b"header".to_vec(),
            data: data.to_vec(),
            auth_size: 12,
        }
    }

    #[test]
    fn test_cipher_mix_is_reversible() {
        let plain = b"sixteen byte msg".to_vec();
        let enc = process(&op(Algorithm::AesCbc, Direction::Encrypt, &plain)).unwrap();
        assert_ne!(enc, plain);
        let dec = process(&op(Algorithm::AesCbc, Direction::Decrypt, &enc)).unwrap();
        assert_eq!(dec, plain);
    }

    #[test]
    fn test_aead_tag_is_checked() {
        let plain = b"payload".to_vec();
        let sealed = process(&op(Algorithm::AesCcm, Direction::Encrypt, &plain)).unwrap();
        assert_eq!(sealed.len(), plain.len() + 12);

        let opened = process(&op(Algorithm::AesCcm, Direction::Decrypt, &sealed)).unwrap();
        assert_eq!(opened, plain);

        let mut tampered = sealed.clone();
        tampered[0] ^= 1;
        assert_eq!(
            process(&op(Algorithm::AesCcm, Direction::Decrypt, &tampered)),
            Err(HalError::AuthFailure)
        );
    }

    #[test]
    fn test_digest_has_algorithm_size() {
        let digest = process(&op(Algorithm::Sha256, Direction::Encrypt, b"abc")).unwrap();
        assert_eq!(digest.len(), 32);
    }
}
