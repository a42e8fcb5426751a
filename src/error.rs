// SPDX-License-Identifier: MIT

//! Error taxonomy for the streaming and distribution core.
//!
//! Each kind is kept distinct per the propagation order in the design: a
//! [`ValidationError`] is always recovered locally, a [`ConnectionError`]
//! always triggers reconnect rather than stopping a worker, and so on.
//! Nothing is collapsed into a generic "it failed" variant.

use thiserror::Error;

/// Malformed location or custom attribute input. Recovered locally by the
/// encoder: the offending item is skipped and logged, the batch continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("location {uid:?} is missing a required field: {field}")]
    MissingField { uid: String, field: &'static str },
    #[error("location {uid:?} has out-of-range {field}: {value}")]
    OutOfRange {
        uid: String,
        field: &'static str,
        value: String,
    },
    #[error("invalid CoT type string: {0:?}")]
    InvalidCotType(String),
    #[error("custom attribute name {0:?} does not match the allowed name pattern")]
    InvalidAttributeName(String),
    #[error("custom attribute would override protected name {0:?}")]
    ProtectedNameOverride(String),
}

/// Network/DNS/5xx/parse failure talking to a provider. Not fatal: recorded
/// and surfaced on the next tick.
#[derive(Debug, Clone, Error)]
#[error("transient provider error: {0}")]
pub struct TransientProviderError(pub String);

/// 401/403 from a provider. Marks the owning worker `Failed`; requires a
/// reconfigure to clear.
#[derive(Debug, Clone, Error)]
#[error("provider authentication error: {0}")]
pub struct AuthProviderError(pub String);

/// Dial/TLS handshake/write failure on a TAK connection. Triggers the
/// reconnect backoff loop; never stops the owning workers.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("peer closed the connection")]
    PeerClosed,
}

/// Inconsistent configuration, e.g. a stream targeting an unknown server.
/// The affected worker fails fast at start; other workers are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("stream {stream_id} targets unknown server {server_id}")]
    UnknownServer { stream_id: i64, server_id: i64 },
    #[error("stream {stream_id} has duplicate callsign mapping identifier {identifier:?}")]
    DuplicateMappingIdentifier { stream_id: i64, identifier: String },
    #[error("stream {stream_id} has invalid poll_interval_seconds: {value}")]
    InvalidPollInterval { stream_id: i64, value: i64 },
    #[error("unknown enumeration value for {field}: {value:?}")]
    UnknownEnumValue { field: &'static str, value: String },
}

/// Propagates through suspension points (sleep, fetch, encode join, enqueue)
/// to a clean stop. Never logged as an error; it is the normal shutdown
/// path.
#[derive(Debug, Clone, Error)]
#[error("operation cancelled")]
pub struct CancelledError;

/// Aggregate error type for call sites that must return a single error
/// type (the public `StreamManager`/`CoTService` APIs). Internal
/// components keep using the named kinds above and convert at the
/// boundary.
#[derive(Debug, Clone, Error)]
pub enum TrakBridgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    TransientProvider(#[from] TransientProviderError),
    #[error(transparent)]
    AuthProvider(#[from] AuthProviderError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}
