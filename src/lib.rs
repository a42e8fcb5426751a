// SPDX-License-Identifier: MIT
// Copyright (c) 2021-2025 Martyn P <martyn@datasync.dev>

//! Streaming and distribution core for TrakBridge.
//!
//! Polls GPS/OSINT providers on a per-stream interval, normalises each
//! observation into a [`Location`](location::Location), resolves callsign
//! overrides, encodes a Cursor-on-Target XML event, and fans it out to
//! every TAK server attached to that stream over a persistent TCP/TLS
//! connection.
//!
//! # Pipeline
//!
//! ```text
//! ProviderClient::fetch  →  CallsignMapper::apply  →  encoder::encode
//!     →  PerformanceGovernor::encode_batch  →  TakConnection::enqueue
//! ```
//!
//! [`StreamManager`](manager::StreamManager) owns the fetch side (one
//! [`StreamWorker`](worker::StreamWorker) per stream);
//! [`CoTService`](service::CoTService) owns the connection side (one
//! [`TakConnection`](connection::TakConnection) per TAK server). Both are
//! constructed independently by the host process and wired together by
//! passing the same `HashMap<i64, TakConnection>` into each worker.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trakbridge_core::clock::SystemClock;
//! use trakbridge_core::governor::PerformanceGovernor;
//! use trakbridge_core::manager::StreamManager;
//! use trakbridge_core::service::CoTService;
//!
//! # async fn example() {
//! let clock = Arc::new(SystemClock);
//! let governor = Arc::new(PerformanceGovernor::new(Default::default()));
//! let manager = StreamManager::new(governor, Arc::clone(&clock) as Arc<dyn trakbridge_core::clock::Clock>);
//! let service = CoTService::new(clock);
//! # let _ = (manager, service);
//! # }
//! ```

pub mod callsign;
pub mod clock;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod governor;
pub mod location;
pub mod manager;
pub mod provider;
pub mod service;
pub mod worker;

pub use config::{StreamConfig, TakServerConfig};
pub use connection::TakConnection;
pub use error::TrakBridgeError;
pub use location::Location;
pub use manager::StreamManager;
pub use service::CoTService;
