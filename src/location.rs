// SPDX-License-Identifier: MIT

//! The [`Location`] record produced by a [`crate::provider::ProviderClient`]
//! and consumed by the [`crate::encoder`] and [`crate::callsign`] stages.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Free-form key/value bag carried alongside a location. A handful of keys
/// are reserved and interpreted by the encoder (see the accessor methods
/// below); everything else is opaque to the core.
pub type AdditionalData = HashMap<String, Value>;

/// A single location observation from a provider.
///
/// Constructed by [`crate::provider::ProviderClient::fetch`], mutated only
/// by [`crate::callsign::CallsignMapper`], discarded after encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    /// Stable string identifier for this tracked entity.
    pub uid: String,
    /// Display name; may be overwritten by a callsign mapping.
    pub name: String,
    /// Latitude in decimal degrees, WGS84.
    pub lat: f64,
    /// Longitude in decimal degrees, WGS84.
    pub lon: f64,
    /// UTC instant of the observation. `None` means "now" at encode time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Speed in metres per second. Must be non-negative when present.
    #[serde(default)]
    pub speed: Option<f64>,
    /// Course over ground in degrees, normalised to `[0, 360)`.
    #[serde(default)]
    pub course: Option<f64>,
    /// Reserved keys: `battery_state` (0..=100), `team_member_enabled`
    /// (bool), `team_role`, `team_color`, `cot_type` (provider-supplied
    /// override consulted when `cot_type_mode == PerPoint`).
    #[serde(default)]
    pub additional_data: Option<AdditionalData>,
    /// Structured `<event>`/`<detail>` XML extension, interpreted by
    /// `crate::encoder::xml`.
    #[serde(default)]
    pub custom_cot_attrib: Option<HashMap<String, Value>>,
}

impl Location {
    /// Validates the invariants from the data model: non-empty identity
    /// fields, in-range coordinates, non-negative speed, normalised course.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.uid.is_empty() {
            return Err(ValidationError::MissingField {
                uid: self.uid.clone(),
                field: "uid",
            });
        }
        if self.name.is_empty() {
            return Err(ValidationError::MissingField {
                uid: self.uid.clone(),
                field: "name",
            });
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::OutOfRange {
                uid: self.uid.clone(),
                field: "lat",
                value: self.lat.to_string(),
            });
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ValidationError::OutOfRange {
                uid: self.uid.clone(),
                field: "lon",
                value: self.lon.to_string(),
            });
        }
        if let Some(speed) = self.speed {
            if speed < 0.0 {
                return Err(ValidationError::OutOfRange {
                    uid: self.uid.clone(),
                    field: "speed",
                    value: speed.to_string(),
                });
            }
        }
        if let Some(course) = self.course {
            if !(0.0..360.0).contains(&course) {
                return Err(ValidationError::OutOfRange {
                    uid: self.uid.clone(),
                    field: "course",
                    value: course.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn battery_state(&self) -> Option<i64> {
        self.additional_data
            .as_ref()?
            .get("battery_state")?
            .as_i64()
    }

    pub fn team_member_enabled(&self) -> bool {
        self.additional_data
            .as_ref()
            .and_then(|m| m.get("team_member_enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn team_role_raw(&self) -> Option<&str> {
        self.additional_data
            .as_ref()?
            .get("team_role")?
            .as_str()
    }

    pub fn team_color_raw(&self) -> Option<&str> {
        self.additional_data
            .as_ref()?
            .get("team_color")?
            .as_str()
    }

    /// Provider-supplied CoT type, consulted by `cot_type_mode == PerPoint`
    /// resolution when no callsign mapping override is present.
    pub fn provider_cot_type(&self) -> Option<&str> {
        self.additional_data
            .as_ref()?
            .get("cot_type")?
            .as_str()
    }

    /// CoT type override written by `CallsignMapper` (distinct from
    /// `provider_cot_type`, which comes from the provider itself).
    pub fn mapping_cot_type_override(&self) -> Option<&str> {
        self.additional_data
            .as_ref()?
            .get("cot_type_override")?
            .as_str()
    }
}
