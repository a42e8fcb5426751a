// SPDX-License-Identifier: MIT

//! `StreamWorker` (§4.3): the per-stream tick loop — fetch once, map
//! callsigns, encode, fan out to every attached [`TakConnection`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::callsign::CallsignMapper;
use crate::clock::Clock;
use crate::config::StreamConfig;
use crate::connection::TakConnection;
use crate::error::TransientProviderError;
use crate::governor::PerformanceGovernor;
use crate::provider::{FetchOutcome, ProviderClient};

/// Worker lifecycle state (§4.3). `Failed` is terminal until the owning
/// `StreamConfig` is replaced wholesale via `reconfigure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Degraded,
    Failed,
    Stopped,
}

/// Read-only worker status (§4.3 `health()`).
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    pub state: WorkerState,
    pub last_error: Option<String>,
    pub ticks_completed: u64,
    pub consecutive_transient_failures: u64,
    pub current_interval_seconds: u64,
}

/// One tracked stream's polling loop. Every tick is a single call to the
/// provider (§4.3 "single-fetch fan-out invariant": one upstream fetch
/// produces at most one encode pass and at most one enqueue per attached
/// server, never re-fetched for a second server).
pub struct StreamWorker {
    stream_id: i64,
    config: RwLock<StreamConfig>,
    provider: Arc<dyn ProviderClient>,
    connections: RwLock<HashMap<i64, TakConnection>>,
    governor: Arc<PerformanceGovernor>,
    clock: Arc<dyn Clock>,
    state: std::sync::Mutex<WorkerState>,
    last_error: std::sync::Mutex<Option<String>>,
    ticks_completed: AtomicU64,
    consecutive_transient_failures: AtomicU64,
    degraded: AtomicBool,
    cancel: CancellationToken,
}

/// Widening applied to `poll_interval_seconds` once
/// `DEGRADE_AFTER_FAILURES` consecutive transient provider failures have
/// been observed, capped at `MAX_DEGRADED_MULTIPLIER` (§4.3 "degraded
/// interval widening").
const DEGRADE_AFTER_FAILURES: u64 = 5;
const MAX_DEGRADED_MULTIPLIER: u64 = 10;

/// Upper bound on how long a single tick's fetch may run: one second less
/// than the poll interval (so a slow fetch never overlaps the next tick),
/// capped at 60s (§4.3 step 2).
const MAX_FETCH_TIMEOUT_SECONDS: u64 = 60;

impl StreamWorker {
    pub fn new(
        config: StreamConfig,
        provider: Arc<dyn ProviderClient>,
        connections: HashMap<i64, TakConnection>,
        governor: Arc<PerformanceGovernor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stream_id: config.id,
            config: RwLock::new(config),
            provider,
            connections: RwLock::new(connections),
            governor,
            clock,
            state: std::sync::Mutex::new(WorkerState::Running),
            last_error: std::sync::Mutex::new(None),
            ticks_completed: AtomicU64::new(0),
            consecutive_transient_failures: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stream_id(&self) -> i64 {
        self.stream_id
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap() = state;
    }

    fn set_error(&self, err: impl std::fmt::Display) {
        *self.last_error.lock().unwrap() = Some(err.to_string());
    }

    /// Runs the tick loop until cancelled. Each iteration sleeps for the
    /// current (possibly degraded) interval, then performs exactly one
    /// fetch/encode/fan-out cycle.
    pub async fn run(self: Arc<Self>) {
        loop {
            let interval = self.current_interval();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_state(WorkerState::Stopped);
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            }

            if *self.state.lock().unwrap() == WorkerState::Failed {
                continue;
            }

            self.tick().await;
            self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn tick(&self) {
        let config = self.config.read().await.clone();
        let fetch_timeout = Duration::from_secs(
            config
                .poll_interval_seconds
                .saturating_sub(1)
                .min(MAX_FETCH_TIMEOUT_SECONDS)
                .max(1),
        );
        let outcome = match tokio::time::timeout(fetch_timeout, self.provider.fetch(&config.provider_config)).await
        {
            Ok(outcome) => outcome,
            Err(_elapsed) => FetchOutcome::Transient(TransientProviderError(format!(
                "fetch exceeded {}s timeout",
                fetch_timeout.as_secs()
            ))),
        };

        let locations = match outcome {
            FetchOutcome::Locations(locations) => {
                self.consecutive_transient_failures
                    .store(0, Ordering::Relaxed);
                self.set_degraded(false);
                self.set_state(WorkerState::Running);
                locations
            }
            FetchOutcome::Transient(e) => {
                self.set_error(&e);
                let failures = self
                    .consecutive_transient_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if failures >= DEGRADE_AFTER_FAILURES {
                    self.set_degraded(true);
                    self.set_state(WorkerState::Degraded);
                }
                log::warn!("stream {}: transient provider error: {e}", self.stream_id);
                return;
            }
            FetchOutcome::Auth(e) => {
                self.set_error(&e);
                self.set_state(WorkerState::Failed);
                log::error!("stream {}: provider auth failure: {e}", self.stream_id);
                return;
            }
        };

        let mapped = CallsignMapper::new(&config).apply(locations);
        if mapped.is_empty() {
            return;
        }

        let encoded = self
            .governor
            .encode_batch(&mapped, &config, self.clock.as_ref())
            .await;

        let connections = self.connections.read().await;
        for result in encoded {
            match result {
                Ok((bytes, warnings)) => {
                    for warning in warnings {
                        log::warn!("stream {}: {warning}", self.stream_id);
                    }
                    for server_id in &config.attached_server_ids {
                        if let Some(conn) = connections.get(server_id) {
                            conn.enqueue(bytes.clone()).await;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("stream {}: dropped invalid location: {e}", self.stream_id);
                }
            }
        }
    }

    fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
        self.governor.set_degraded(degraded);
    }

    fn current_interval(&self) -> u64 {
        let base = self
            .config
            .try_read()
            .map(|c| c.poll_interval_seconds)
            .unwrap_or(30);
        if self.degraded.load(Ordering::Relaxed) {
            let failures = self.consecutive_transient_failures.load(Ordering::Relaxed);
            let multiplier = (failures - DEGRADE_AFTER_FAILURES + 2).min(MAX_DEGRADED_MULTIPLIER);
            base.saturating_mul(multiplier)
        } else {
            base
        }
    }

    /// Replaces the stream's configuration and attached connections in
    /// place, clearing a prior `Failed` state (§4.3 "reconfigure clears
    /// Failed").
    pub async fn reconfigure(
        &self,
        config: StreamConfig,
        connections: HashMap<i64, TakConnection>,
    ) {
        *self.config.write().await = config;
        *self.connections.write().await = connections;
        self.consecutive_transient_failures
            .store(0, Ordering::Relaxed);
        self.set_degraded(false);
        self.set_state(WorkerState::Running);
        *self.last_error.lock().unwrap() = None;
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether `stop()` has been called — lets a supervisor distinguish a
    /// clean shutdown from `run()` exiting on a panic it did not cause.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            state: *self.state.lock().unwrap(),
            last_error: self.last_error.lock().unwrap().clone(),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            consecutive_transient_failures: self
                .consecutive_transient_failures
                .load(Ordering::Relaxed),
            current_interval_seconds: self.current_interval(),
        }
    }
}
