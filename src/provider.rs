// SPDX-License-Identifier: MIT

//! Provider fetch side (§4.3): a shared HTTP client plus the
//! [`ProviderClient`] trait each tracker source implements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AuthProviderError, TransientProviderError};
use crate::location::Location;

/// One fetch cycle's outcome for a single provider (§4.3): either a batch
/// of locations, a transient failure (logged and retried next tick), or an
/// authentication failure (fails the owning worker until reconfigured).
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Locations(Vec<Location>),
    Transient(TransientProviderError),
    Auth(AuthProviderError),
}

/// Implemented once per upstream GPS/OSINT provider kind. `fetch` receives
/// the already-decrypted `provider_config` JSON object from the owning
/// [`crate::config::StreamConfig`]; a provider never reads configuration
/// itself.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The `provider_kind` string this implementation answers to, matched
    /// against `StreamConfig::provider_kind` by whatever constructs the
    /// worker's `Box<dyn ProviderClient>`.
    fn kind(&self) -> &'static str;

    async fn fetch(&self, provider_config: &serde_json::Map<String, serde_json::Value>)
        -> FetchOutcome;
}

/// Connection pool and timeout policy shared by every HTTP-backed
/// provider, built once per process and handed to each provider
/// implementation rather than letting each one build its own client.
#[derive(Clone)]
pub struct HttpSession {
    client: reqwest::Client,
}

impl HttpSession {
    /// Connect timeout 10s, total request timeout 30s, idle pooled
    /// connections capped at 32 per host and recycled after 90s — built
    /// once, reused across every fetch rather than constructed per call.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new().expect("default reqwest client configuration must build")
    }
}

/// An in-memory provider used by tests and as a usage example: returns a
/// fixed batch of locations (or a fixed failure) every call.
pub struct StaticProvider {
    outcome: Arc<FetchOutcome>,
}

impl StaticProvider {
    pub fn new(outcome: FetchOutcome) -> Self {
        Self {
            outcome: Arc::new(outcome),
        }
    }
}

#[async_trait]
impl ProviderClient for StaticProvider {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn fetch(
        &self,
        _provider_config: &serde_json::Map<String, serde_json::Value>,
    ) -> FetchOutcome {
        (*self.outcome).clone()
    }
}
