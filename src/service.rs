// SPDX-License-Identifier: MIT

//! `CoTService` (§4.4): the connection-side registry, keyed by TAK server
//! id, with single-flight construction so two concurrent callers asking
//! for the same server never race to dial it twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::clock::Clock;
use crate::config::TakServerConfig;
use crate::connection::TakConnection;

/// Owns one [`TakConnection`] per configured TAK server. Cloning a
/// `CoTService` shares the same registry (it is `Arc`-backed internally),
/// matching how `StreamManager` and the host process both need a handle
/// to the same live connections.
#[derive(Clone)]
pub struct CoTService {
    connections: Arc<RwLock<HashMap<i64, TakConnection>>>,
    /// Serializes `get_or_create` so concurrent callers for the same new
    /// server id don't both win the race and leak a dialed connection.
    construction_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
}

impl CoTService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            construction_lock: Arc::new(Mutex::new(())),
            clock,
        }
    }

    /// Returns the existing connection for `config.id`, or dials and
    /// registers a new one. Safe to call concurrently for the same id.
    pub async fn get_or_create(&self, config: TakServerConfig) -> TakConnection {
        if let Some(conn) = self.connections.read().await.get(&config.id) {
            return conn.clone();
        }

        let _guard = self.construction_lock.lock().await;
        if let Some(conn) = self.connections.read().await.get(&config.id) {
            return conn.clone();
        }

        let conn = TakConnection::with_clock(config.id, config.clone(), Arc::clone(&self.clock));
        conn.start().await;
        self.connections
            .write()
            .await
            .insert(config.id, conn.clone());
        conn
    }

    pub async fn get(&self, server_id: i64) -> Option<TakConnection> {
        self.connections.read().await.get(&server_id).cloned()
    }

    /// Replaces a server's configuration, flushing its queue per §9 Open
    /// Question #1 (in-flight write completes, queued items are dropped).
    pub async fn reconfigure(&self, config: TakServerConfig) {
        if let Some(conn) = self.connections.read().await.get(&config.id) {
            conn.flush_on_config_change();
            conn.update_config(config);
        }
    }

    pub async fn close(&self, server_id: i64, grace: Duration) {
        let conn = self.connections.write().await.remove(&server_id);
        if let Some(conn) = conn {
            conn.stop(grace).await;
        }
    }

    pub async fn close_all(&self, grace: Duration) {
        let connections: Vec<_> = self.connections.write().await.drain().map(|(_, c)| c).collect();
        for conn in connections {
            conn.stop(grace).await;
        }
    }
}
