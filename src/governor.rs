// SPDX-License-Identifier: MIT

//! `PerformanceGovernor` (§6): decides serial vs. parallel batch encoding,
//! bounds concurrency, and trips a circuit breaker on sustained failure.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::{CircuitBreakerTunables, PerformanceTunables};
use crate::encoder;
use crate::error::ValidationError;
use crate::location::Location;
use crate::config::StreamConfig;

/// Point-in-time counters exposed by [`PerformanceGovernor::statistics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GovernorStatistics {
    pub batches_processed: u64,
    pub items_encoded: u64,
    pub items_failed: u64,
    pub parallel_batches: u64,
    pub circuit_breaker_trips: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    tunables: CircuitBreakerTunables,
    state: std::sync::Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
    opened_at: std::sync::Mutex<Option<Instant>>,
    trips: AtomicU64,
}

impl Breaker {
    fn new(tunables: CircuitBreakerTunables) -> Self {
        Self {
            tunables,
            state: std::sync::Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: std::sync::Mutex::new(None),
            trips: AtomicU64::new(0),
        }
    }

    /// Whether a batch may proceed right now. An `Open` breaker transitions
    /// to `HalfOpen` once the recovery timeout has elapsed, allowing one
    /// probe batch through.
    fn allow(&self) -> bool {
        if !self.tunables.enabled {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = *self.opened_at.lock().unwrap();
                let recovery = Duration::from_secs(self.tunables.recovery_timeout_seconds);
                if opened_at.map(|t| t.elapsed() >= recovery).unwrap_or(false) {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Read-only check of the current state, without advancing the
    /// recovery timer the way `allow()` does.
    fn is_open(&self) -> bool {
        self.tunables.enabled && *self.state.lock().unwrap() == BreakerState::Open
    }

    fn on_success(&self) {
        if !self.tunables.enabled {
            return;
        }
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.state.lock().unwrap() = BreakerState::Closed;
    }

    fn on_failure(&self) {
        if !self.tunables.enabled {
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock().unwrap();
        if *state == BreakerState::HalfOpen || failures >= self.tunables.failure_threshold {
            *state = BreakerState::Open;
            *self.opened_at.lock().unwrap() = Some(Instant::now());
            self.trips.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Wraps [`encoder::encode_batch`] with the concurrency and
/// circuit-breaking policy from [`PerformanceTunables`]. One instance is
/// shared across every tick of a [`crate::worker::StreamWorker`].
pub struct PerformanceGovernor {
    tunables: std::sync::RwLock<PerformanceTunables>,
    semaphore: std::sync::Mutex<Arc<Semaphore>>,
    breaker: Breaker,
    batches_processed: AtomicU64,
    items_encoded: AtomicU64,
    items_failed: AtomicU64,
    parallel_batches: AtomicU64,
    degraded: AtomicBool,
}

impl PerformanceGovernor {
    pub fn new(tunables: PerformanceTunables) -> Self {
        let semaphore = Arc::new(Semaphore::new(tunables.max_concurrent_tasks.max(1)));
        let breaker = Breaker::new(tunables.circuit_breaker.clone());
        Self {
            tunables: std::sync::RwLock::new(tunables),
            semaphore: std::sync::Mutex::new(semaphore),
            breaker,
            batches_processed: AtomicU64::new(0),
            items_encoded: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            parallel_batches: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn update_tunables(&self, tunables: PerformanceTunables) {
        let semaphore = Arc::new(Semaphore::new(tunables.max_concurrent_tasks.max(1)));
        *self.semaphore.lock().unwrap() = semaphore;
        *self.tunables.write().unwrap() = tunables;
    }

    /// Whether the circuit breaker is currently open (not yet a half-open
    /// probe). Read-only — unlike `Breaker::allow`, this never advances the
    /// recovery timer.
    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Encodes one batch. While the breaker is closed or half-open, uses
    /// parallel encoding once `batch_size_threshold` is met; while it is
    /// open, forces the serial fallback path instead of dropping the batch
    /// (§4.8: an open breaker degrades throughput, it does not stop
    /// delivery). Only parallel-encode outcomes are fed back into the
    /// breaker — a serial batch failing validation wholesale reflects bad
    /// input data, not the systemic trouble the breaker tracks.
    pub async fn encode_batch(
        &self,
        locations: &[Location],
        stream_cfg: &StreamConfig,
        clock: &dyn Clock,
    ) -> Vec<Result<(Vec<u8>, Vec<String>), ValidationError>> {
        let tunables = self.tunables.read().unwrap().clone();
        let parallel_allowed = self.breaker.allow();
        let use_parallel =
            parallel_allowed && tunables.parallel_enabled && locations.len() >= tunables.batch_size_threshold;

        let results = if use_parallel {
            self.parallel_batches.fetch_add(1, Ordering::Relaxed);
            let results = self.encode_parallel(locations, stream_cfg, &tunables).await;

            // A parallel batch that fails validation on *every* item
            // indicates systemic trouble (bad stream config, clock skew,
            // saturated worker pool) rather than isolated bad records.
            let failed = results.iter().filter(|r| r.is_err()).count();
            if !results.is_empty() && failed == results.len() {
                self.breaker.on_failure();
            } else {
                self.breaker.on_success();
            }
            results
        } else {
            encoder::encode_batch(locations, stream_cfg, clock)
        };

        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        let failed = results.iter().filter(|r| r.is_err()).count() as u64;
        let encoded = results.len() as u64 - failed;
        self.items_encoded.fetch_add(encoded, Ordering::Relaxed);
        self.items_failed.fetch_add(failed, Ordering::Relaxed);

        results
    }

    /// Each spawned task runs against a real-time clock rather than the
    /// caller's `clock` reference: `&dyn Clock` is not `Send`, and a
    /// parallel batch's timestamps only need to agree with each other to
    /// within the processing timeout, not with a test's fixed instant —
    /// tests exercise the serial path for deterministic-clock assertions.
    async fn encode_parallel(
        &self,
        locations: &[Location],
        stream_cfg: &StreamConfig,
        tunables: &PerformanceTunables,
    ) -> Vec<Result<(Vec<u8>, Vec<String>), ValidationError>> {
        let semaphore = self.semaphore.lock().unwrap().clone();
        let timeout = Duration::from_secs_f64(tunables.processing_timeout_seconds);

        let mut handles = Vec::with_capacity(locations.len());
        for location in locations {
            let location = location.clone();
            let stream_cfg = stream_cfg.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let effective = encoder::resolve_effective_cot_type(&location, &stream_cfg);
                let clock = crate::clock::SystemClock;
                encoder::encode(&location, &stream_cfg, &effective, &clock)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(_join_error)) => results.push(Err(ValidationError::InvalidCotType(
                    "encode task panicked".into(),
                ))),
                Err(_elapsed) => results.push(Err(ValidationError::InvalidCotType(
                    "encode task exceeded processing_timeout_seconds".into(),
                ))),
            }
        }
        results
    }

    pub fn statistics(&self) -> GovernorStatistics {
        GovernorStatistics {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            items_encoded: self.items_encoded.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            parallel_batches: self.parallel_batches.load(Ordering::Relaxed),
            circuit_breaker_trips: self.breaker.trips.load(Ordering::Relaxed),
        }
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{CotTypeMode, UnmappedPolicy};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap())
    }

    fn stream_cfg() -> StreamConfig {
        StreamConfig {
            id: 1,
            name: "demo".into(),
            provider_kind: "garmin".into(),
            provider_config: serde_json::Map::new(),
            poll_interval_seconds: 30,
            cot_type_default: "a-f-G-F-U".into(),
            cot_stale_seconds: 120,
            attached_server_ids: HashSet::new(),
            callsign_mappings: vec![],
            cot_type_mode: CotTypeMode::Stream,
            identifier_field: "uid".into(),
            unmapped_policy: UnmappedPolicy::PassThrough,
            active: true,
        }
    }

    fn location(uid: &str) -> Location {
        Location {
            uid: uid.into(),
            name: "N".into(),
            lat: 1.0,
            lon: 2.0,
            timestamp: None,
            speed: None,
            course: None,
            additional_data: None,
            custom_cot_attrib: None,
        }
    }

    #[tokio::test]
    async fn small_batch_runs_serially() {
        let governor = PerformanceGovernor::new(PerformanceTunables::default());
        let locs = vec![location("A"), location("B")];
        let results = governor.encode_batch(&locs, &stream_cfg(), &clock()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(governor.statistics().parallel_batches, 0);
    }

    #[tokio::test]
    async fn large_batch_runs_in_parallel() {
        let mut tunables = PerformanceTunables::default();
        tunables.batch_size_threshold = 2;
        let governor = PerformanceGovernor::new(tunables);
        let locs: Vec<_> = (0..5).map(|i| location(&format!("U-{i}"))).collect();
        let results = governor.encode_batch(&locs, &stream_cfg(), &clock()).await;
        assert_eq!(results.len(), 5);
        assert_eq!(governor.statistics().parallel_batches, 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_all_failing_parallel_batches() {
        let mut tunables = PerformanceTunables::default();
        tunables.batch_size_threshold = 1;
        tunables.circuit_breaker.failure_threshold = 2;
        let governor = PerformanceGovernor::new(tunables);
        let mut bad = location("");
        bad.uid.clear();
        for _ in 0..2 {
            governor
                .encode_batch(&[bad.clone()], &stream_cfg(), &clock())
                .await;
        }
        assert_eq!(governor.statistics().parallel_batches, 2);
        assert!(governor.is_open());
    }

    #[tokio::test]
    async fn open_breaker_forces_serial_fallback_instead_of_dropping() {
        let mut tunables = PerformanceTunables::default();
        tunables.batch_size_threshold = 1;
        tunables.circuit_breaker.failure_threshold = 1;
        tunables.circuit_breaker.recovery_timeout_seconds = 3600;
        let governor = PerformanceGovernor::new(tunables);
        let mut bad = location("");
        bad.uid.clear();
        governor
            .encode_batch(&[bad], &stream_cfg(), &clock())
            .await;
        assert!(governor.is_open());

        let locs = vec![location("A")];
        let results = governor.encode_batch(&locs, &stream_cfg(), &clock()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(governor.statistics().parallel_batches, 1);
    }

    #[test]
    fn degraded_flag_round_trips() {
        let governor = PerformanceGovernor::new(PerformanceTunables::default());
        assert!(!governor.is_degraded());
        governor.set_degraded(true);
        assert!(governor.is_degraded());
    }
}
