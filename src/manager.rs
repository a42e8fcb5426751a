// SPDX-License-Identifier: MIT

//! `StreamManager` (§4.4): owns the registry of running
//! [`StreamWorker`]s, starts/stops/reconfigures them, and supervises
//! worker tasks that exit unexpectedly with the same widening backoff
//! `StreamWorker` applies to its own provider failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::StreamConfig;
use crate::connection::TakConnection;
use crate::governor::PerformanceGovernor;
use crate::provider::ProviderClient;
use crate::worker::{StreamWorker, WorkerHealth};

/// Backoff schedule for restarting a worker task that exited on its own
/// (§4.4): 1s, 2s, 5s, 10s, then holds at 10s.
const RESTART_BACKOFF_SECONDS: &[u64] = &[1, 2, 5, 10];

struct ManagedStream {
    worker: Arc<StreamWorker>,
    handle: JoinHandle<()>,
}

/// Registry and supervisor for every configured stream. One instance per
/// process; the host process is responsible for constructing the
/// `Arc<dyn ProviderClient>` for each `provider_kind` it supports.
pub struct StreamManager {
    streams: RwLock<HashMap<i64, ManagedStream>>,
    governor: Arc<PerformanceGovernor>,
    clock: Arc<dyn Clock>,
}

impl StreamManager {
    pub fn new(governor: Arc<PerformanceGovernor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            governor,
            clock,
        }
    }

    /// Starts a stream. Replaces any existing worker for the same stream
    /// id (stopping it first) rather than erroring, matching
    /// `reconfigure`'s "always converges to the latest config" contract.
    pub async fn start(
        &self,
        config: StreamConfig,
        provider: Arc<dyn ProviderClient>,
        connections: HashMap<i64, TakConnection>,
    ) {
        self.stop(config.id).await;

        if !config.is_runnable() {
            log::info!(
                "stream {}: not runnable (inactive or no attached servers), not starting",
                config.id
            );
            return;
        }

        let stream_id = config.id;
        let worker = Arc::new(StreamWorker::new(
            config,
            provider,
            connections,
            Arc::clone(&self.governor),
            Arc::clone(&self.clock),
        ));
        let handle = spawn_supervised(Arc::clone(&worker));
        self.streams
            .write()
            .await
            .insert(stream_id, ManagedStream { worker, handle });
    }

    /// Applies a new configuration to a running worker in place, or starts
    /// one if the stream was not previously running.
    pub async fn reconfigure(
        &self,
        config: StreamConfig,
        provider: Arc<dyn ProviderClient>,
        connections: HashMap<i64, TakConnection>,
    ) {
        let stream_id = config.id;
        let existing = self.streams.read().await.get(&stream_id).map(|m| Arc::clone(&m.worker));
        match existing {
            Some(worker) => worker.reconfigure(config, connections).await,
            None => self.start(config, provider, connections).await,
        }
    }

    pub async fn stop(&self, stream_id: i64) {
        if let Some(managed) = self.streams.write().await.remove(&stream_id) {
            managed.worker.stop();
            managed.handle.abort();
        }
    }

    pub async fn stop_all(&self) {
        let mut streams = self.streams.write().await;
        for (_, managed) in streams.drain() {
            managed.worker.stop();
            managed.handle.abort();
        }
    }

    pub async fn health(&self, stream_id: i64) -> Option<WorkerHealth> {
        self.streams
            .read()
            .await
            .get(&stream_id)
            .map(|m| m.worker.health())
    }

    pub async fn all_health(&self) -> HashMap<i64, WorkerHealth> {
        self.streams
            .read()
            .await
            .iter()
            .map(|(id, m)| (*id, m.worker.health()))
            .collect()
    }
}

/// Runs `worker.run()` in an inner task and restarts it with the widening
/// backoff above if it ever exits without `stop()` having been called
/// (i.e. it panicked), rather than leaving the stream silently dead. A
/// clean shutdown (`stop()` cancels the worker) is not retried.
fn spawn_supervised(worker: Arc<StreamWorker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt = 0usize;
        loop {
            let inner = tokio::spawn(Arc::clone(&worker).run());
            let panicked = inner.await.is_err();

            if worker.is_stopped() || !panicked {
                return;
            }

            let delay = RESTART_BACKOFF_SECONDS[attempt.min(RESTART_BACKOFF_SECONDS.len() - 1)];
            attempt += 1;
            log::warn!(
                "stream {}: worker task panicked, restarting in {delay}s",
                worker.stream_id()
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    })
}
