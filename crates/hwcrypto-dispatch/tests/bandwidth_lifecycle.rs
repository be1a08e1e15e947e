// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bus bandwidth, idle release, suspend/resume and blocking HMAC key setup
//! against simulated engines that need their bus voted up

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hwcrypto_config::DispatchConfig;
use hwcrypto_dispatch::*;
use hwcrypto_hal::{BandwidthLevel, CompletionMode, EngineCapabilities, SimEvent, SimulatedEngine};
use parking_lot::Mutex;

// ═══════════════════════════════════════════════════════════
// Helper Functions
// ═══════════════════════════════════════════════════════════

type Log = Arc<Mutex<Vec<RequestStatus>>>;

const WAIT: Duration = Duration::from_secs(5);

fn config(idle_timeout_ms: u64) -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.polling.interval_us = 100;
    config.polling.max_retry = 200;
    config.bandwidth.idle_timeout_ms = idle_timeout_ms;
    config
}

fn scaled_engine(max_requests: usize, suspendable: bool) -> Arc<SimulatedEngine> {
    Arc::new(SimulatedEngine::new(EngineCapabilities {
        max_requests,
        bus_scaling: true,
        clk_mgmt_sus_res: suspendable,
        ..Default::default()
    }))
}

fn digest(log: &Log) -> CryptoRequest {
    let log = Arc::clone(log);
    CryptoRequest::digest(b"payload".to_vec(), move |status| log.lock().push(status))
}

fn finals(log: &Log) -> usize {
    log.lock().iter().filter(|s| s.is_final()).count()
}

fn bandwidth(registry: &Registry, id: EngineId) -> Option<BandwidthState> {
    registry.engine_info(id).map(|info| info.bandwidth)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Clock and bandwidth events only, submissions filtered out
fn bus_events(engine: &SimulatedEngine) -> Vec<SimEvent> {
    engine
        .events()
        .into_iter()
        .filter(|e| !matches!(e, SimEvent::Submitted(_) | SimEvent::Completed(_)))
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Allocation and idle release
// ═══════════════════════════════════════════════════════════

#[test]
fn test_bandwidth_is_allocated_on_demand_and_released_when_idle() {
    let registry = Registry::new(&config(30)).unwrap();
    let engine = scaled_engine(2, false);
    let id = registry.attach_engine(engine.clone(), None).unwrap();
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::NoBandwidth));
    assert!(!engine.clock_enabled());

    let transform = registry.create_transform(Algorithm::Sha1).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || finals(&log) == 1));
    assert!(matches!(log.lock()[0], RequestStatus::Done(Ok(_))));

    // the idle reaper needs one quiet period after the last activity
    assert!(wait_until(WAIT, || bandwidth(&registry, id)
        == Some(BandwidthState::NoBandwidth)));
    assert!(!engine.clock_enabled());
    assert_eq!(engine.bandwidth_level(), BandwidthLevel::Low);

    let events = engine.events();
    let submitted = events
        .iter()
        .position(|e| matches!(e, SimEvent::Submitted(_)))
        .unwrap();
    assert_eq!(
        &events[..submitted],
        &[SimEvent::ClockEnabled, SimEvent::Bandwidth(BandwidthLevel::High)]
    );
    assert_eq!(
        &events[events.len() - 2..],
        &[SimEvent::Bandwidth(BandwidthLevel::Low), SimEvent::ClockDisabled]
    );

    // and comes back for the next request
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || finals(&log) == 2));
    assert_eq!(
        bus_events(&engine),
        vec![
            SimEvent::ClockEnabled,
            SimEvent::Bandwidth(BandwidthLevel::High),
            SimEvent::Bandwidth(BandwidthLevel::Low),
            SimEvent::ClockDisabled,
            SimEvent::ClockEnabled,
            SimEvent::Bandwidth(BandwidthLevel::High),
        ]
    );
}

#[test]
fn test_bandwidth_is_kept_while_work_is_in_flight() {
    let registry = Registry::new(&config(20)).unwrap();
    let engine = scaled_engine(1, false);
    engine.set_mode(CompletionMode::Manual);
    let id = registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::Sha256).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || engine.in_flight_count() == 1));

    // several reaper periods pass with the operation stuck in hardware
    thread::sleep(Duration::from_millis(100));
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::HasBandwidth));
    assert!(engine.clock_enabled());

    engine.set_mode(CompletionMode::OnPoll);
    assert!(wait_until(WAIT, || finals(&log) == 1));
    assert!(wait_until(WAIT, || bandwidth(&registry, id)
        == Some(BandwidthState::NoBandwidth)));
}

#[test]
fn test_failed_allocation_is_retried() {
    let registry = Registry::new(&config(1000)).unwrap();
    let engine = scaled_engine(1, false);
    engine.set_fail_bandwidth(true);
    let id = registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::Sha1).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();

    thread::sleep(Duration::from_millis(10));
    assert_ne!(bandwidth(&registry, id), Some(BandwidthState::HasBandwidth));
    assert_eq!(engine.submitted_count(), 0);
    assert_eq!(finals(&log), 0);

    engine.set_fail_bandwidth(false);
    // a second request re-arms the poller if it already went idle
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || finals(&log) == 2));
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::HasBandwidth));
}

// ═══════════════════════════════════════════════════════════
// Suspend and resume
// ═══════════════════════════════════════════════════════════

#[test]
fn test_suspend_from_no_bandwidth_and_resume() {
    let registry = Registry::new(&config(1000)).unwrap();
    let engine = scaled_engine(2, true);
    let id = registry.attach_engine(engine.clone(), None).unwrap();

    registry.suspend_engine(id).unwrap();
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::Suspended));
    assert_eq!(
        registry.suspend_engine(id),
        Err(DispatchError::EngineBusy {
            engine: id.0,
            state: "suspended"
        })
    );

    // requests queue up but nothing runs while suspended
    let transform = registry.create_transform(Algorithm::Sha1).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    thread::sleep(Duration::from_millis(10));
    assert_eq!(finals(&log), 0);
    assert_eq!(engine.submitted_count(), 0);

    registry.resume_engine(id).unwrap();
    assert!(wait_until(WAIT, || finals(&log) == 1));
    assert_eq!(
        bus_events(&engine),
        vec![
            SimEvent::Suspended,
            SimEvent::Resumed,
            SimEvent::ClockEnabled,
            SimEvent::Bandwidth(BandwidthLevel::High),
        ]
    );
}

#[test]
fn test_suspend_releases_held_bandwidth() {
    let registry = Registry::new(&config(10_000)).unwrap();
    let engine = scaled_engine(2, true);
    let id = registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::Sha1).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || finals(&log) == 1));
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::HasBandwidth));

    registry.suspend_engine(id).unwrap();
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::Suspended));
    assert!(!engine.clock_enabled());
    assert_eq!(
        &bus_events(&engine)[2..],
        &[
            SimEvent::Bandwidth(BandwidthLevel::Low),
            SimEvent::ClockDisabled,
            SimEvent::Suspended,
        ]
    );

    registry.resume_engine(id).unwrap();
    assert_eq!(bandwidth(&registry, id), Some(BandwidthState::NoBandwidth));
}

#[test]
fn test_suspend_refused_while_busy() {
    let registry = Registry::new(&config(10_000)).unwrap();
    let engine = scaled_engine(1, true);
    engine.set_mode(CompletionMode::Manual);
    let id = registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::Sha1).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || engine.in_flight_count() == 1));

    assert_eq!(
        registry.suspend_engine(id),
        Err(DispatchError::EngineBusy {
            engine: id.0,
            state: "has-bandwidth"
        })
    );
    assert_eq!(
        registry.resume_engine(id),
        Err(DispatchError::EngineBusy {
            engine: id.0,
            state: "has-bandwidth"
        })
    );

    engine.complete_all();
    assert!(wait_until(WAIT, || finals(&log) == 1));
    assert_eq!(registry.suspend_engine(id), Ok(()));
}

// ═══════════════════════════════════════════════════════════
// HMAC key setup
// ═══════════════════════════════════════════════════════════

#[test]
fn test_long_hmac_key_is_digested_on_the_engine() {
    let registry = Registry::new(&config(1000)).unwrap();
    let engine = scaled_engine(2, false);
    registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::HmacSha256).unwrap();
    transform.set_key(&[0x5a; 100]).unwrap();
    assert_eq!(engine.submitted_count(), 1);
    assert_eq!(transform.pending_responses(), 0);

    engine.set_mode(CompletionMode::Manual);
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || engine.in_flight_count() == 1));

    let op = engine.operation(engine.in_flight_ids()[0]).unwrap();
    assert_eq!(op.algorithm, Algorithm::HmacSha256);
    assert_eq!(op.key.len(), 32);

    engine.complete_all();
    assert!(wait_until(WAIT, || finals(&log) == 1));
    assert!(matches!(&log.lock()[0], RequestStatus::Done(Ok(mac)) if mac.len() == 32));
    assert_eq!(registry.stats().operations.hash_success, 2);
}

#[test]
fn test_short_hmac_key_is_used_directly() {
    let registry = Registry::new(&config(1000)).unwrap();
    let engine = scaled_engine(1, false);
    registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::HmacSha1).unwrap();
    transform.set_key(&[1; 20]).unwrap();
    assert_eq!(engine.submitted_count(), 0);
    assert_eq!(registry.hmac_setkey(&transform, &[2; 64]), Ok(()));
    assert_eq!(engine.submitted_count(), 0);
}

// ═══════════════════════════════════════════════════════════
// Detach
// ═══════════════════════════════════════════════════════════

#[test]
fn test_detach_lets_in_flight_work_finish_and_releases_the_bus() {
    // long idle timeout so only the detach path can drop the bus
    let registry = Registry::new(&config(10_000)).unwrap();
    let engine = Arc::new(SimulatedEngine::with_mode(
        EngineCapabilities {
            device_id: 0,
            max_requests: 1,
            bus_scaling: true,
            ..Default::default()
        },
        CompletionMode::Manual,
    ));
    let id = registry.attach_engine(engine.clone(), None).unwrap();

    let transform = registry.create_transform(Algorithm::Sha256).unwrap();
    let log: Log = Arc::default();
    registry.submit(&transform, digest(&log)).unwrap();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || engine.in_flight_count() == 1));
    assert!(engine.clock_enabled());

    registry.detach_engine(id).unwrap();
    // completions now only surface when the engine is polled
    engine.set_mode(CompletionMode::OnPoll);

    assert!(wait_until(WAIT, || finals(&log) == 2));
    {
        let log = log.lock();
        assert!(matches!(log[0], RequestStatus::Done(Ok(_))));
        assert_eq!(log[1], RequestStatus::Done(Err(DispatchError::NoDevice)));
    }
    assert_eq!(transform.pending_responses(), 0);

    assert!(wait_until(WAIT, || !engine.clock_enabled()));
    assert_eq!(engine.bandwidth_level(), BandwidthLevel::Low);
    assert!(wait_until(WAIT, || registry
        .stats()
        .pollers
        .iter()
        .all(|p| !p.engines.contains(&id.0))));

    // the transform keeps working once pinned to a live engine
    let replacement = Arc::new(SimulatedEngine::new(EngineCapabilities {
        device_id: 1,
        max_requests: 1,
        bus_scaling: true,
        ..Default::default()
    }));
    registry.attach_engine(replacement, None).unwrap();
    transform.set_device(1).unwrap();
    registry.submit(&transform, digest(&log)).unwrap();
    assert!(wait_until(WAIT, || finals(&log) == 3));
    assert!(matches!(log.lock()[2], RequestStatus::Done(Ok(_))));
}
