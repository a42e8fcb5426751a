// SPDX-License-Identifier: MIT

//! Configuration input (§3, §6). Everything here is a plain, read-only
//! data structure handed down by the host process; the core never reads a
//! file or an environment variable to produce one (§9 "Global state →
//! explicit dependencies").

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::encoder::team::{TeamColor, TeamRole};
use crate::error::ConfigurationError;

/// How `effective_cot_type` is resolved for a location (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CotTypeMode {
    /// Always use `StreamConfig::cot_type_default`.
    Stream,
    /// Prefer a callsign mapping override, then the provider-supplied
    /// type, then the stream default.
    PerPoint,
}

/// What happens to a tracker with no matching callsign mapping (§9 Open
/// Question #2 — both behaviours are exposed, default is pass-through).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    PassThrough,
    Drop,
}

impl Default for UnmappedPolicy {
    fn default() -> Self {
        UnmappedPolicy::PassThrough
    }
}

/// Transport used by a [`TakServerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakProtocol {
    Tcp,
    Tls,
}

/// Queue overflow behaviour for a [`crate::connection::TakConnection`]
/// (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropOldest,
    DropNewest,
    Block,
}

/// A single tracker override within a stream (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsignMapping {
    /// Value matched against the stream's designated identifier field.
    pub identifier_value: String,
    pub assigned_callsign: Option<String>,
    /// Either a literal CoT type string or the sentinel `"team_member"`.
    pub cot_type_override: Option<String>,
    pub team_role: Option<TeamRole>,
    pub team_color: Option<TeamColor>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl CallsignMapping {
    /// The sentinel `cot_type_override` value meaning "force the
    /// team-member CoT branch" rather than a literal CoT type string.
    pub const TEAM_MEMBER_SENTINEL: &'static str = "team_member";

    pub fn is_team_member_override(&self) -> bool {
        self.cot_type_override
            .as_deref()
            .map(|v| v == Self::TEAM_MEMBER_SENTINEL)
            .unwrap_or(false)
    }
}

/// Per-pipeline configuration (§3). Read-only to the core; the worker
/// re-reads a new instance of this on `reconfigure` but never mutates one
/// in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: i64,
    pub name: String,
    pub provider_kind: String,
    /// Already decrypted by the configuration collaborator; the core
    /// never stores secrets itself.
    pub provider_config: serde_json::Map<String, serde_json::Value>,
    pub poll_interval_seconds: u64,
    pub cot_type_default: String,
    pub cot_stale_seconds: i64,
    pub attached_server_ids: HashSet<i64>,
    pub callsign_mappings: Vec<CallsignMapping>,
    pub cot_type_mode: CotTypeMode,
    /// Which Location field callsign mappings are keyed against, e.g.
    /// `"uid"` or a dotted `additional_data` key.
    #[serde(default = "default_identifier_field")]
    pub identifier_field: String,
    #[serde(default)]
    pub unmapped_policy: UnmappedPolicy,
    pub active: bool,
}

fn default_identifier_field() -> String {
    "uid".to_string()
}

impl StreamConfig {
    /// Validates the invariants from §3 plus the §7 `ConfigurationError`
    /// cases that must fail a worker fast at start.
    pub fn validate(&self, known_server_ids: &HashSet<i64>) -> Result<(), ConfigurationError> {
        if self.poll_interval_seconds < 1 {
            return Err(ConfigurationError::InvalidPollInterval {
                stream_id: self.id,
                value: self.poll_interval_seconds as i64,
            });
        }
        let mut seen = HashSet::new();
        for mapping in &self.callsign_mappings {
            if !seen.insert(mapping.identifier_value.clone()) {
                return Err(ConfigurationError::DuplicateMappingIdentifier {
                    stream_id: self.id,
                    identifier: mapping.identifier_value.clone(),
                });
            }
        }
        for server_id in &self.attached_server_ids {
            if !known_server_ids.contains(server_id) {
                return Err(ConfigurationError::UnknownServer {
                    stream_id: self.id,
                    server_id: *server_id,
                });
            }
        }
        Ok(())
    }

    /// A stream can only run with at least one attached server.
    pub fn is_runnable(&self) -> bool {
        self.active && !self.attached_server_ids.is_empty()
    }
}

/// Per-TAK-server connection configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakServerConfig {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub protocol: TakProtocol,
    /// Raw PKCS#12 container bytes for mutual-TLS client identity.
    #[serde(default, with = "opt_base64")]
    pub p12_certificate_bytes: Option<Vec<u8>>,
    pub p12_password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

fn default_queue_capacity() -> usize {
    500
}

/// Base64 (de)serialization for the raw P12 bytes so `StreamConfig`/
/// `TakServerConfig` remain plain JSON-transportable, matching how the
/// configuration collaborator ships decrypted blobs across a process
/// boundary.
mod opt_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&base64_encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => base64_decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }

    // Minimal base64 codec to avoid pulling in a dedicated crate for a
    // single opaque-blob field.
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    fn base64_encode(data: &[u8]) -> String {
        let mut out = String::with_capacity((data.len() + 2) / 3 * 4);
        for chunk in data.chunks(3) {
            let b = [
                chunk[0],
                *chunk.get(1).unwrap_or(&0),
                *chunk.get(2).unwrap_or(&0),
            ];
            let n = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            out.push(ALPHABET[(n >> 18 & 0x3f) as usize] as char);
            out.push(ALPHABET[(n >> 12 & 0x3f) as usize] as char);
            out.push(if chunk.len() > 1 {
                ALPHABET[(n >> 6 & 0x3f) as usize] as char
            } else {
                '='
            });
            out.push(if chunk.len() > 2 {
                ALPHABET[(n & 0x3f) as usize] as char
            } else {
                '='
            });
        }
        out
    }

    fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
        let s = s.trim_end_matches('=');
        let mut out = Vec::with_capacity(s.len() * 3 / 4);
        let mut buf = 0u32;
        let mut bits = 0u32;
        for c in s.bytes() {
            let v = ALPHABET
                .iter()
                .position(|&x| x == c)
                .ok_or_else(|| "invalid base64 byte".to_string())? as u32;
            buf = (buf << 6) | v;
            bits += 6;
            if bits >= 8 {
                bits -= 8;
                out.push((buf >> bits) as u8);
            }
        }
        Ok(out)
    }

}

/// Runtime tunables for the [`crate::governor::PerformanceGovernor`] (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTunables {
    pub batch_size_threshold: usize,
    pub max_concurrent_tasks: usize,
    pub processing_timeout_seconds: f64,
    pub parallel_enabled: bool,
    pub circuit_breaker: CircuitBreakerTunables,
    pub statistics_reset_interval_seconds: u64,
}

impl Default for PerformanceTunables {
    fn default() -> Self {
        Self {
            batch_size_threshold: 10,
            max_concurrent_tasks: 50,
            processing_timeout_seconds: 30.0,
            parallel_enabled: true,
            circuit_breaker: CircuitBreakerTunables::default(),
            statistics_reset_interval_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerTunables {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerTunables {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            recovery_timeout_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_config() -> TakServerConfig {
        TakServerConfig {
            id: 1,
            host: "tak.example.com".into(),
            port: 8089,
            protocol: TakProtocol::Tls,
            p12_certificate_bytes: None,
            p12_password: None,
            verify_peer: true,
            queue_capacity: 500,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }

    fn stream_config() -> StreamConfig {
        StreamConfig {
            id: 1,
            name: "demo".into(),
            provider_kind: "garmin".into(),
            provider_config: serde_json::Map::new(),
            poll_interval_seconds: 30,
            cot_type_default: "a-f-G-F-U".into(),
            cot_stale_seconds: 120,
            attached_server_ids: [1].into_iter().collect(),
            callsign_mappings: vec![],
            cot_type_mode: CotTypeMode::Stream,
            identifier_field: "uid".into(),
            unmapped_policy: UnmappedPolicy::PassThrough,
            active: true,
        }
    }

    #[test]
    fn validates_known_servers() {
        let known = [1].into_iter().collect();
        assert!(stream_config().validate(&known).is_ok());
    }

    #[test]
    fn rejects_unknown_server() {
        let known = HashSet::new();
        assert!(matches!(
            stream_config().validate(&known),
            Err(ConfigurationError::UnknownServer { .. })
        ));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut cfg = stream_config();
        cfg.poll_interval_seconds = 0;
        let known = [1].into_iter().collect();
        assert!(matches!(
            cfg.validate(&known),
            Err(ConfigurationError::InvalidPollInterval { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_mapping_identifier() {
        let mut cfg = stream_config();
        cfg.callsign_mappings = vec![
            CallsignMapping {
                identifier_value: "A".into(),
                assigned_callsign: None,
                cot_type_override: None,
                team_role: None,
                team_color: None,
                enabled: true,
            },
            CallsignMapping {
                identifier_value: "A".into(),
                assigned_callsign: None,
                cot_type_override: None,
                team_role: None,
                team_color: None,
                enabled: true,
            },
        ];
        let known = [1].into_iter().collect();
        assert!(matches!(
            cfg.validate(&known),
            Err(ConfigurationError::DuplicateMappingIdentifier { .. })
        ));
    }

    #[test]
    fn is_runnable_requires_active_and_servers() {
        let mut cfg = stream_config();
        assert!(cfg.is_runnable());
        cfg.active = false;
        assert!(!cfg.is_runnable());
        cfg.active = true;
        cfg.attached_server_ids.clear();
        assert!(!cfg.is_runnable());
    }

    #[test]
    fn team_member_sentinel_is_recognised() {
        let mapping = CallsignMapping {
            identifier_value: "A".into(),
            assigned_callsign: None,
            cot_type_override: Some("team_member".into()),
            team_role: None,
            team_color: None,
            enabled: true,
        };
        assert!(mapping.is_team_member_override());
    }

    #[test]
    fn server_config_defaults_are_sane() {
        let cfg = server_config();
        assert_eq!(cfg.queue_capacity, 500);
    }
}
