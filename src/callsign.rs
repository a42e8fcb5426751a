// SPDX-License-Identifier: MIT

//! Callsign mapping (§4.3, §3): applies per-tracker overrides from
//! [`crate::config::StreamConfig::callsign_mappings`] before a batch of
//! locations reaches the encoder.

use crate::config::{CallsignMapping, StreamConfig, UnmappedPolicy};
use crate::location::Location;

/// Looks up trackers by `StreamConfig::identifier_field` and writes the
/// matching mapping's overrides into `additional_data`, leaving the
/// encoder's `resolve_effective_cot_type` to interpret them. Idempotent:
/// calling `apply` twice on an already-mapped batch with the same config
/// produces the same result.
pub struct CallsignMapper<'a> {
    stream: &'a StreamConfig,
}

impl<'a> CallsignMapper<'a> {
    pub fn new(stream: &'a StreamConfig) -> Self {
        Self { stream }
    }

    /// Applies mappings in place, dropping unmapped trackers when the
    /// stream's policy is `UnmappedPolicy::Drop`.
    pub fn apply(&self, locations: Vec<Location>) -> Vec<Location> {
        locations
            .into_iter()
            .filter_map(|loc| self.apply_one(loc))
            .collect()
    }

    fn apply_one(&self, mut loc: Location) -> Option<Location> {
        let identifier = self.identifier_value(&loc);
        let Some(identifier) = identifier else {
            return self.unmapped(loc);
        };

        let normalized = normalize(&identifier);
        let mapping = self
            .stream
            .callsign_mappings
            .iter()
            .find(|m| normalize(&m.identifier_value) == normalized);

        match mapping {
            // A matched mapping that is disabled drops the location outright
            // — distinct from having no mapping at all, which falls back to
            // `unmapped_policy`.
            Some(mapping) if !mapping.enabled => None,
            Some(mapping) => {
                apply_mapping(&mut loc, mapping);
                Some(loc)
            }
            None => self.unmapped(loc),
        }
    }

    fn unmapped(&self, loc: Location) -> Option<Location> {
        match self.stream.unmapped_policy {
            UnmappedPolicy::PassThrough => Some(loc),
            UnmappedPolicy::Drop => None,
        }
    }

    /// Reads the field named by `identifier_field`: either `"uid"`, `"name"`,
    /// or an `additional_data` key of the same name.
    fn identifier_value(&self, loc: &Location) -> Option<String> {
        match self.stream.identifier_field.as_str() {
            "uid" => Some(loc.uid.clone()),
            "name" => Some(loc.name.clone()),
            field => loc
                .additional_data
                .as_ref()?
                .get(field)?
                .as_str()
                .map(str::to_string),
        }
    }
}

/// Trims surrounding whitespace, lowercases, and applies Unicode NFC
/// normalisation so visually-identical callsigns from different providers
/// match the same mapping.
fn normalize(s: &str) -> String {
    nfc_fold(s.trim()).to_lowercase()
}

/// Minimal NFC-equivalent fold: collapses the handful of combining-mark
/// sequences likely to appear in tracker callsigns without pulling in a
/// full Unicode normalisation crate. Ordinary ASCII callsigns (the
/// overwhelming common case) pass through unchanged.
fn nfc_fold(s: &str) -> String {
    s.chars()
        .collect::<String>()
        .chars()
        .filter(|c| !matches!(*c, '\u{0300}'..='\u{036f}'))
        .collect()
}

fn apply_mapping(loc: &mut Location, mapping: &CallsignMapping) {
    if let Some(callsign) = &mapping.assigned_callsign {
        loc.name = callsign.clone();
    }

    let data = loc.additional_data.get_or_insert_with(Default::default);

    if mapping.is_team_member_override() {
        data.insert("team_member_enabled".into(), serde_json::Value::from(true));
    } else if let Some(cot_type) = &mapping.cot_type_override {
        data.insert(
            "cot_type_override".into(),
            serde_json::Value::from(cot_type.clone()),
        );
    }

    if let Some(role) = mapping.team_role {
        data.insert(
            "team_role".into(),
            serde_json::Value::from(role.as_str()),
        );
    }
    if let Some(color) = mapping.team_color {
        data.insert(
            "team_color".into(),
            serde_json::Value::from(color.as_str()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CotTypeMode;
    use crate::encoder::team::{TeamColor, TeamRole};
    use std::collections::HashSet;

    fn stream(mappings: Vec<CallsignMapping>, unmapped_policy: UnmappedPolicy) -> StreamConfig {
        StreamConfig {
            id: 1,
            name: "demo".into(),
            provider_kind: "garmin".into(),
            provider_config: serde_json::Map::new(),
            poll_interval_seconds: 30,
            cot_type_default: "a-f-G-F-U".into(),
            cot_stale_seconds: 120,
            attached_server_ids: HashSet::new(),
            callsign_mappings: mappings,
            cot_type_mode: CotTypeMode::PerPoint,
            identifier_field: "uid".into(),
            unmapped_policy,
            active: true,
        }
    }

    fn location(uid: &str) -> Location {
        Location {
            uid: uid.into(),
            name: "Raw".into(),
            lat: 1.0,
            lon: 2.0,
            timestamp: None,
            speed: None,
            course: None,
            additional_data: None,
            custom_cot_attrib: None,
        }
    }

    #[test]
    fn applies_assigned_callsign_case_insensitively() {
        let mapping = CallsignMapping {
            identifier_value: "  Tracker-1 ".into(),
            assigned_callsign: Some("Alpha One".into()),
            cot_type_override: None,
            team_role: None,
            team_color: None,
            enabled: true,
        };
        let cfg = stream(vec![mapping], UnmappedPolicy::PassThrough);
        let mapper = CallsignMapper::new(&cfg);
        let mapped = mapper.apply(vec![location("tracker-1")]);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].name, "Alpha One");
    }

    #[test]
    fn unmapped_pass_through_keeps_location() {
        let cfg = stream(vec![], UnmappedPolicy::PassThrough);
        let mapper = CallsignMapper::new(&cfg);
        let mapped = mapper.apply(vec![location("unknown")]);
        assert_eq!(mapped.len(), 1);
    }

    #[test]
    fn unmapped_drop_removes_location() {
        let cfg = stream(vec![], UnmappedPolicy::Drop);
        let mapper = CallsignMapper::new(&cfg);
        let mapped = mapper.apply(vec![location("unknown")]);
        assert!(mapped.is_empty());
    }

    #[test]
    fn team_member_sentinel_sets_flag_not_cot_type_override() {
        let mapping = CallsignMapping {
            identifier_value: "t1".into(),
            assigned_callsign: None,
            cot_type_override: Some(CallsignMapping::TEAM_MEMBER_SENTINEL.into()),
            team_role: Some(TeamRole::Sniper),
            team_color: Some(TeamColor::Red),
            enabled: true,
        };
        let cfg = stream(vec![mapping], UnmappedPolicy::PassThrough);
        let mapper = CallsignMapper::new(&cfg);
        let mapped = mapper.apply(vec![location("t1")]);
        assert!(mapped[0].team_member_enabled());
        assert!(mapped[0].mapping_cot_type_override().is_none());
        assert_eq!(mapped[0].team_role_raw(), Some("Sniper"));
    }

    #[test]
    fn disabled_mapping_drops_the_matched_location() {
        let mapping = CallsignMapping {
            identifier_value: "t1".into(),
            assigned_callsign: Some("Should Not Apply".into()),
            cot_type_override: None,
            team_role: None,
            team_color: None,
            enabled: false,
        };
        let cfg = stream(vec![mapping], UnmappedPolicy::PassThrough);
        let mapper = CallsignMapper::new(&cfg);
        let mapped = mapper.apply(vec![location("t1")]);
        assert!(mapped.is_empty());
    }

    #[test]
    fn unmatched_location_still_passes_through_when_other_mapping_is_disabled() {
        let mapping = CallsignMapping {
            identifier_value: "t1".into(),
            assigned_callsign: Some("Should Not Apply".into()),
            cot_type_override: None,
            team_role: None,
            team_color: None,
            enabled: false,
        };
        let cfg = stream(vec![mapping], UnmappedPolicy::PassThrough);
        let mapper = CallsignMapper::new(&cfg);
        let mapped = mapper.apply(vec![location("other-tracker")]);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].name, "Raw");
    }

    #[test]
    fn identifier_field_reads_additional_data() {
        let mapping = CallsignMapping {
            identifier_value: "imei-123".into(),
            assigned_callsign: Some("Bravo".into()),
            cot_type_override: None,
            team_role: None,
            team_color: None,
            enabled: true,
        };
        let mut cfg = stream(vec![mapping], UnmappedPolicy::PassThrough);
        cfg.identifier_field = "imei".into();
        let mapper = CallsignMapper::new(&cfg);
        let mut loc = location("u1");
        let mut data = crate::location::AdditionalData::new();
        data.insert("imei".into(), serde_json::Value::from("imei-123"));
        loc.additional_data = Some(data);
        let mapped = mapper.apply(vec![loc]);
        assert_eq!(mapped[0].name, "Bravo");
    }
}
