// SPDX-License-Identifier: MIT
// Copyright (c) 2021-2025 Martyn P <martyn@datasync.dev>

//! `TakConnection` (§4.2): one persistent transport to one TAK server, a
//! bounded outbound queue with an explicit overflow policy, an
//! exponential-backoff reconnect loop, and a single-writer wire discipline.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use rand::Rng;
use rustls::client::danger::{ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{OverflowPolicy, TakProtocol, TakServerConfig};

/// Transport abstraction over plain TCP and TLS.
enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for Transport {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Transport {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[derive(Debug)]
struct DangerousAcceptAnyServerCertVerifier;

impl ServerCertVerifier for DangerousAcceptAnyServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }

    fn requires_raw_public_keys(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> Option<&[rustls::DistinguishedName]> {
        None
    }
}

/// A client identity plus optional CA chain extracted from a PKCS#12
/// container (§4.2 "the P12 blob is parsed to cert, key, ca-chain").
struct P12Identity {
    certificate: CertificateDer<'static>,
    private_key: PrivateKeyDer<'static>,
    ca_chain: Vec<CertificateDer<'static>>,
}

fn parse_p12(der: &[u8], password: &str) -> Result<P12Identity, io::Error> {
    // The password is an opaque byte string; nothing interpolates it, so
    // `%`, `$` and friends pass through untouched.
    let pkcs12 = openssl::pkcs12::Pkcs12::from_der(der)
        .map_err(|e| io::Error::other(format!("invalid PKCS#12 container: {e}")))?;
    let parsed = pkcs12
        .parse2(password)
        .map_err(|e| io::Error::other(format!("failed to decrypt PKCS#12: {e}")))?;

    let cert = parsed
        .cert
        .ok_or_else(|| io::Error::other("PKCS#12 container has no client certificate"))?;
    let pkey = parsed
        .pkey
        .ok_or_else(|| io::Error::other("PKCS#12 container has no private key"))?;

    let cert_der = cert
        .to_der()
        .map_err(|e| io::Error::other(format!("failed to DER-encode client certificate: {e}")))?;
    let key_der = pkey
        .private_key_to_pkcs8()
        .map_err(|e| io::Error::other(format!("failed to DER-encode private key: {e}")))?;

    let mut ca_chain = Vec::new();
    if let Some(stack) = parsed.ca {
        for ca_cert in stack.iter() {
            let der = ca_cert.to_der().map_err(|e| {
                io::Error::other(format!("failed to DER-encode CA certificate: {e}"))
            })?;
            ca_chain.push(CertificateDer::from(der));
        }
    }

    Ok(P12Identity {
        certificate: CertificateDer::from(cert_der),
        private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        ca_chain,
    })
}

fn system_root_store() -> Result<RootCertStore, io::Error> {
    let mut store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| io::Error::other(format!("failed to load native certs: {e}")))?;
    for cert in native {
        let _ = store.add(cert);
    }
    if store.is_empty() {
        return Err(io::Error::other(
            "no usable root certificates found in the system trust store",
        ));
    }
    Ok(store)
}

async fn dial(config: &TakServerConfig) -> Result<Transport, io::Error> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;

    if config.protocol == TakProtocol::Tcp {
        return Ok(Transport::Tcp(tcp));
    }

    let identity = match (&config.p12_certificate_bytes, &config.p12_password) {
        (Some(bytes), Some(password)) => Some(parse_p12(bytes, password)?),
        (Some(_), None) => {
            return Err(io::Error::other(
                "p12_certificate_bytes was provided without a p12_password",
            ))
        }
        _ => None,
    };

    let builder = ClientConfig::builder();
    let client_config = if !config.verify_peer {
        let builder = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyServerCertVerifier));
        match identity {
            Some(id) => builder
                .with_client_auth_cert(vec![id.certificate], id.private_key)
                .map_err(|e| io::Error::other(format!("invalid client identity: {e}")))?,
            None => builder.with_no_client_auth(),
        }
    } else {
        let mut root_store = RootCertStore::empty();
        let mut used_p12_ca = false;
        if let Some(id) = &identity {
            for ca in &id.ca_chain {
                let _ = root_store.add(ca.clone());
                used_p12_ca = true;
            }
        }
        if !used_p12_ca {
            root_store = system_root_store()?;
        }
        let builder = builder.with_root_certificates(root_store);
        match identity {
            Some(id) => builder
                .with_client_auth_cert(vec![id.certificate], id.private_key)
                .map_err(|e| io::Error::other(format!("invalid client identity: {e}")))?,
            None => builder.with_no_client_auth(),
        }
    };

    let connector = TlsConnector::from(Arc::new(client_config));
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| io::Error::other(format!("invalid server name {:?}: {e}", config.host)))?;
    let tls = connector.connect(server_name, tcp).await?;
    Ok(Transport::Tls(Box::new(tls)))
}

/// Connection lifecycle states (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Closed,
}

impl ConnState {
    fn to_u8(self) -> u8 {
        match self {
            ConnState::Disconnected => 0,
            ConnState::Connecting => 1,
            ConnState::Connected => 2,
            ConnState::Draining => 3,
            ConnState::Closed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Disconnected,
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            3 => ConnState::Draining,
            _ => ConnState::Closed,
        }
    }
}

/// Result of one `enqueue` call (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    DroppedOldest,
    DroppedNewest,
    BlockedTimeout,
}

/// Read-only connection status (§4.2 `health()`).
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub state: ConnState,
    pub last_error: Option<String>,
    pub queue_depth: usize,
    pub bytes_written_total: u64,
    pub drop_oldest_total: u64,
    pub drop_newest_total: u64,
    pub flush_on_reconfigure_total: u64,
}

struct BoundedQueue {
    items: StdMutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    item_ready: Notify,
    space_freed: Notify,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: StdMutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            item_ready: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn try_push(&self, item: Vec<u8>) -> bool {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        drop(items);
        self.item_ready.notify_one();
        true
    }

    /// Pushes unconditionally, evicting the oldest item if full. Returns
    /// `true` if an eviction occurred.
    fn push_evicting_oldest(&self, item: Vec<u8>) -> bool {
        let mut items = self.items.lock().unwrap();
        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            true
        } else {
            false
        };
        items.push_back(item);
        drop(items);
        self.item_ready.notify_one();
        evicted
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        let mut items = self.items.lock().unwrap();
        let item = items.pop_front();
        drop(items);
        if item.is_some() {
            self.space_freed.notify_waiters();
        }
        item
    }

    fn clear(&self) -> usize {
        let mut items = self.items.lock().unwrap();
        let n = items.len();
        items.clear();
        drop(items);
        self.space_freed.notify_waiters();
        n
    }
}

/// Exponential backoff with jitter (§4.2): base 1s, factor 2, jitter
/// ±20%, cap 60s, reset after 60s of continuous connected time.
struct Backoff {
    attempt: u32,
}

impl Backoff {
    const BASE: StdDuration = StdDuration::from_secs(1);
    const CAP: StdDuration = StdDuration::from_secs(60);
    const RESET_AFTER: StdDuration = StdDuration::from_secs(60);

    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> StdDuration {
        let exp = Self::BASE.as_secs_f64() * 2f64.powi(self.attempt as i32);
        let base = exp.min(Self::CAP.as_secs_f64());
        self.attempt += 1;
        let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (base * (1.0 + jitter)).max(0.0);
        StdDuration::from_secs_f64(jittered)
    }
}

struct Inner {
    server_id: i64,
    config: StdMutex<TakServerConfig>,
    queue: Arc<BoundedQueue>,
    state: AtomicU8,
    last_error: StdMutex<Option<String>>,
    bytes_written_total: AtomicU64,
    drop_oldest_total: AtomicU64,
    drop_newest_total: AtomicU64,
    flush_on_reconfigure_total: AtomicU64,
    #[allow(dead_code)]
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn set_state(&self, state: ConnState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_error(&self, err: impl std::fmt::Display) {
        *self.last_error.lock().unwrap() = Some(err.to_string());
    }
}

/// One persistent outbound connection to one TAK server (§4.2). Cheaply
/// cloneable: clones share the same queue, state, and background task.
#[derive(Clone)]
pub struct TakConnection {
    inner: Arc<Inner>,
    task: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl TakConnection {
    pub fn new(server_id: i64, config: TakServerConfig) -> Self {
        Self::with_clock(server_id, config, Arc::new(SystemClock))
    }

    pub fn with_clock(server_id: i64, config: TakServerConfig, clock: Arc<dyn Clock>) -> Self {
        let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let inner = Arc::new(Inner {
            server_id,
            config: StdMutex::new(config),
            queue,
            state: AtomicU8::new(ConnState::Disconnected.to_u8()),
            last_error: StdMutex::new(None),
            bytes_written_total: AtomicU64::new(0),
            drop_oldest_total: AtomicU64::new(0),
            drop_newest_total: AtomicU64::new(0),
            flush_on_reconfigure_total: AtomicU64::new(0),
            clock,
        });
        Self {
            inner,
            task: Arc::new(AsyncMutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn server_id(&self) -> i64 {
        self.inner.server_id
    }

    /// Spawns the I/O driver task. Idempotent: a second call on an
    /// already-started connection is a no-op.
    pub async fn start(&self) {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *guard = Some(tokio::spawn(run_driver(inner, cancel)));
    }

    /// Submits one encoded event, subject to the configured overflow
    /// policy (§4.2, §5 "enqueue must return within 100 ms under
    /// backpressure").
    pub async fn enqueue(&self, bytes: Vec<u8>) -> EnqueueOutcome {
        let policy = self.inner.config.lock().unwrap().overflow_policy;
        match policy {
            OverflowPolicy::DropNewest => {
                if self.inner.queue.try_push(bytes) {
                    EnqueueOutcome::Accepted
                } else {
                    self.inner
                        .drop_newest_total
                        .fetch_add(1, Ordering::Relaxed);
                    EnqueueOutcome::DroppedNewest
                }
            }
            OverflowPolicy::DropOldest => {
                if self.inner.queue.push_evicting_oldest(bytes) {
                    self.inner
                        .drop_oldest_total
                        .fetch_add(1, Ordering::Relaxed);
                    EnqueueOutcome::DroppedOldest
                } else {
                    EnqueueOutcome::Accepted
                }
            }
            OverflowPolicy::Block => {
                if self.inner.queue.try_push(bytes.clone()) {
                    return EnqueueOutcome::Accepted;
                }
                let deadline = StdDuration::from_millis(100);
                let waited =
                    tokio::time::timeout(deadline, self.inner.queue.space_freed.notified()).await;
                if waited.is_ok() && self.inner.queue.try_push(bytes) {
                    EnqueueOutcome::Accepted
                } else {
                    self.inner
                        .drop_newest_total
                        .fetch_add(1, Ordering::Relaxed);
                    EnqueueOutcome::BlockedTimeout
                }
            }
        }
    }

    /// Atomically discards all queued (not in-flight) events. An item
    /// already popped by the writer and mid-write, if any, still
    /// completes — only the queue contents are dropped (§9 Open Question
    /// #1, resolved as "in-flight write completes").
    pub fn flush_on_config_change(&self) {
        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            self.inner
                .flush_on_reconfigure_total
                .fetch_add(dropped as u64, Ordering::Relaxed);
            log::warn!(
                "server {}: flushed {dropped} queued event(s) on configuration change",
                self.inner.server_id
            );
        }
    }

    pub fn update_config(&self, config: TakServerConfig) {
        *self.inner.config.lock().unwrap() = config;
    }

    /// Drains the queue for up to `grace`, then cancels the driver task
    /// and forces it closed.
    pub async fn stop(&self, grace: StdDuration) {
        self.inner.set_state(ConnState::Draining);
        let deadline = tokio::time::Instant::now() + grace;
        while self.inner.queue.len() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(StdDuration::from_millis(500), handle).await;
        }
        self.inner.set_state(ConnState::Closed);
    }

    pub fn health(&self) -> ConnectionHealth {
        ConnectionHealth {
            state: self.inner.state(),
            last_error: self.inner.last_error.lock().unwrap().clone(),
            queue_depth: self.inner.queue.len(),
            bytes_written_total: self.inner.bytes_written_total.load(Ordering::Relaxed),
            drop_oldest_total: self.inner.drop_oldest_total.load(Ordering::Relaxed),
            drop_newest_total: self.inner.drop_newest_total.load(Ordering::Relaxed),
            flush_on_reconfigure_total: self
                .inner
                .flush_on_reconfigure_total
                .load(Ordering::Relaxed),
        }
    }
}

async fn run_driver(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut backoff = Backoff::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        inner.set_state(ConnState::Connecting);
        let config_snapshot = inner.config.lock().unwrap().clone();
        match dial(&config_snapshot).await {
            Ok(mut transport) => {
                inner.set_state(ConnState::Connected);
                backoff.reset();
                log::info!("server {}: connected", inner.server_id);
                let connected_at = tokio::time::Instant::now();

                loop {
                    if connected_at.elapsed() >= Backoff::RESET_AFTER {
                        backoff.reset();
                    }

                    if cancel.is_cancelled() {
                        drain_and_write(&inner, &mut transport).await;
                        inner.set_state(ConnState::Closed);
                        return;
                    }

                    match inner.queue.try_pop() {
                        Some(item) => {
                            if let Err(e) = write_item(&mut transport, &item).await {
                                inner.set_error(&e);
                                log::warn!("server {}: write failed: {e}", inner.server_id);
                                break;
                            }
                            inner
                                .bytes_written_total
                                .fetch_add(item.len() as u64, Ordering::Relaxed);
                        }
                        None => {
                            tokio::select! {
                                _ = inner.queue.item_ready.notified() => {}
                                _ = cancel.cancelled() => {}
                                _ = tokio::time::sleep(StdDuration::from_millis(200)) => {}
                            }
                        }
                    }
                }

                inner.set_state(ConnState::Disconnected);
            }
            Err(e) => {
                inner.set_error(&e);
                inner.set_state(ConnState::Disconnected);
                log::warn!("server {}: dial failed: {e}", inner.server_id);
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_state(ConnState::Closed);
}

async fn drain_and_write(inner: &Arc<Inner>, transport: &mut Transport) {
    while let Some(item) = inner.queue.try_pop() {
        if write_item(transport, &item).await.is_err() {
            break;
        }
        inner
            .bytes_written_total
            .fetch_add(item.len() as u64, Ordering::Relaxed);
    }
}

/// Writes one already null-terminated CoT event and flushes. The encoder
/// (§4.1) appends the `0x00` framing byte; the writer never appends a
/// second one.
async fn write_item(transport: &mut Transport, item: &[u8]) -> io::Result<()> {
    transport.write_all(item).await?;
    transport.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn server_config(policy: OverflowPolicy, capacity: usize) -> TakServerConfig {
        TakServerConfig {
            id: 1,
            host: "127.0.0.1".into(),
            port: 1,
            protocol: TakProtocol::Tcp,
            p12_certificate_bytes: None,
            p12_password: None,
            verify_peer: true,
            queue_capacity: capacity,
            overflow_policy: policy,
        }
    }

    #[tokio::test]
    async fn drop_oldest_evicts_head() {
        let conn = TakConnection::new(1, server_config(OverflowPolicy::DropOldest, 3));
        for item in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec()] {
            assert_eq!(conn.enqueue(item).await, EnqueueOutcome::Accepted);
        }
        let outcome = conn.enqueue(b"D".to_vec()).await;
        assert_eq!(outcome, EnqueueOutcome::DroppedOldest);
        assert_eq!(conn.health().drop_oldest_total, 1);
        assert_eq!(conn.inner.queue.try_pop(), Some(b"B".to_vec()));
        assert_eq!(conn.inner.queue.try_pop(), Some(b"C".to_vec()));
        assert_eq!(conn.inner.queue.try_pop(), Some(b"D".to_vec()));
    }

    #[tokio::test]
    async fn drop_newest_rejects_new_item() {
        let conn = TakConnection::new(1, server_config(OverflowPolicy::DropNewest, 1));
        assert_eq!(conn.enqueue(b"A".to_vec()).await, EnqueueOutcome::Accepted);
        assert_eq!(
            conn.enqueue(b"B".to_vec()).await,
            EnqueueOutcome::DroppedNewest
        );
        assert_eq!(conn.health().drop_newest_total, 1);
        assert_eq!(conn.inner.queue.try_pop(), Some(b"A".to_vec()));
    }

    #[tokio::test]
    async fn block_policy_times_out_after_100ms() {
        let conn = TakConnection::new(1, server_config(OverflowPolicy::Block, 1));
        assert_eq!(conn.enqueue(b"A".to_vec()).await, EnqueueOutcome::Accepted);
        let start = tokio::time::Instant::now();
        let outcome = conn.enqueue(b"B".to_vec()).await;
        assert_eq!(outcome, EnqueueOutcome::BlockedTimeout);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn flush_on_config_change_empties_queue_and_counts() {
        let conn = TakConnection::new(1, server_config(OverflowPolicy::DropNewest, 5));
        conn.enqueue(b"A".to_vec()).await;
        conn.enqueue(b"B".to_vec()).await;
        conn.flush_on_config_change();
        assert_eq!(conn.health().queue_depth, 0);
        assert_eq!(conn.health().flush_on_reconfigure_total, 2);
    }

    #[test]
    fn backoff_delays_land_within_jitter_band() {
        let mut backoff = Backoff::new();
        let d1 = backoff.next_delay().as_secs_f64();
        let d2 = backoff.next_delay().as_secs_f64();
        let d3 = backoff.next_delay().as_secs_f64();
        assert!((0.8..=1.2).contains(&d1), "{d1}");
        assert!((1.6..=2.4).contains(&d2), "{d2}");
        assert!((3.2..=4.8).contains(&d3), "{d3}");
    }

    #[test]
    fn backoff_caps_at_60_seconds() {
        let mut backoff = Backoff::new();
        for _ in 0..20 {
            backoff.next_delay();
        }
        let d = backoff.next_delay().as_secs_f64();
        assert!(d <= 72.0);
    }

    #[tokio::test]
    async fn health_reports_disconnected_before_start() {
        let conn = TakConnection::new(1, server_config(OverflowPolicy::DropNewest, 5));
        assert_eq!(conn.health().state, ConnState::Disconnected);
    }
}
