// SPDX-License-Identifier: MIT

//! `CotEncoder` (§4.1): a pure, stateless `{Location, StreamConfig} → CoT
//! XML bytes` transform, safe to invoke in parallel.

pub mod team;
pub mod xml;

use chrono::Duration;

use crate::clock::Clock;
use crate::config::{CallsignMapping, CotTypeMode, StreamConfig};
use crate::error::ValidationError;
use crate::location::Location;
use team::{TeamColor, TeamRole};

/// CoT type forced on any location whose team-member branch is active,
/// regardless of any other override (§4.1).
pub const TEAM_MEMBER_COT_TYPE: &str = "a-f-G-U-C";
const TEAM_MEMBER_HOW: &str = "h-e";
const STANDARD_HOW: &str = "m-g";

/// The CoT type and branch selection for one location, resolved once per
/// tick per §4.1's "cot_type resolution" rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveCotType {
    pub cot_type: String,
    pub team_member: bool,
}

/// Resolves `effective_cot_type` per §4.1. Reads only from `location` and
/// `stream_cfg`; `CallsignMapper` has already folded any mapping override
/// into `location.additional_data` before this runs (§4.3 step 3/4), so
/// this function needs no separate mapping parameter.
pub fn resolve_effective_cot_type(location: &Location, stream_cfg: &StreamConfig) -> EffectiveCotType {
    let mapping_override = location.mapping_cot_type_override();
    let team_member = location.team_member_enabled()
        || mapping_override == Some(CallsignMapping::TEAM_MEMBER_SENTINEL);

    let mut cot_type = match stream_cfg.cot_type_mode {
        CotTypeMode::Stream => stream_cfg.cot_type_default.clone(),
        CotTypeMode::PerPoint => mapping_override
            .filter(|v| *v != CallsignMapping::TEAM_MEMBER_SENTINEL)
            .map(String::from)
            .or_else(|| location.provider_cot_type().map(String::from))
            .unwrap_or_else(|| stream_cfg.cot_type_default.clone()),
    };

    if team_member {
        cot_type = TEAM_MEMBER_COT_TYPE.to_string();
    }

    EffectiveCotType { cot_type, team_member }
}

/// Encodes one location into a null-terminated CoT XML event per §4.1 and
/// §6 (the TCP/TLS wire framing convention). Returns `Err` only for a
/// structurally invalid location (§3 invariants); custom-attribute
/// problems are recovered locally and only produce log warnings via the
/// returned `warnings` list.
pub fn encode(
    location: &Location,
    stream_cfg: &StreamConfig,
    effective: &EffectiveCotType,
    clock: &dyn Clock,
) -> Result<(Vec<u8>, Vec<String>), ValidationError> {
    location.validate()?;
    if effective.cot_type.is_empty() {
        return Err(ValidationError::InvalidCotType(effective.cot_type.clone()));
    }

    let mut warnings = Vec::new();
    let now = location.timestamp.unwrap_or_else(|| clock.now());
    let stale = now + Duration::seconds(stream_cfg.cot_stale_seconds);
    let how = if effective.team_member {
        TEAM_MEMBER_HOW
    } else {
        STANDARD_HOW
    };

    let custom = location.custom_cot_attrib.as_ref();
    let event_ext = custom
        .and_then(|c| c.get("event"))
        .map(|tree| xml::render_top_level(tree, &[], xml::PROTECTED_EVENT_ATTRS))
        .unwrap_or_default();
    warnings.extend(event_ext.warnings);

    let detail_ext = custom
        .and_then(|c| c.get("detail"))
        .map(|tree| xml::render_top_level(tree, xml::PROTECTED_DETAIL_CHILDREN, &[]))
        .unwrap_or_default();
    warnings.extend(detail_ext.warnings);

    let detail_body = if effective.team_member {
        build_team_member_detail(location, &mut warnings)
    } else {
        build_standard_detail(location)
    };

    let detail_xml = format!(
        "<detail{attrs}>{body}{extra_text}{extra_children}</detail>",
        attrs = detail_ext.extra_attrs,
        body = detail_body,
        extra_text = detail_ext.text.unwrap_or_default(),
        extra_children = detail_ext.children_xml
    );

    let event_xml = format!(
        "<event version=\"2.0\" uid=\"{uid}\" type=\"{cot_type}\" how=\"{how}\" time=\"{time}\" start=\"{start}\" stale=\"{stale}\"{event_attrs}><point lat=\"{lat}\" lon=\"{lon}\" hae=\"9999999.0\" ce=\"9999999.0\" le=\"9999999.0\"/>{event_text}{detail}{event_children}</event>",
        uid = xml::escape_attr(&location.uid),
        cot_type = xml::escape_attr(&effective.cot_type),
        how = how,
        time = format_timestamp(now),
        start = format_timestamp(now),
        stale = format_timestamp(stale),
        event_attrs = event_ext.extra_attrs,
        lat = location.lat,
        lon = location.lon,
        event_text = event_ext.text.unwrap_or_default(),
        detail = detail_xml,
        event_children = event_ext.children_xml,
    );

    let mut bytes = event_xml.into_bytes();
    bytes.push(0x00);
    Ok((bytes, warnings))
}

fn build_standard_detail(location: &Location) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<contact callsign=\"{}\"/>",
        xml::escape_attr(&location.name)
    ));

    if location.speed.is_some() || location.course.is_some() {
        let mut remarks = String::new();
        if let Some(speed) = location.speed {
            remarks.push_str(&format!("Speed: {speed} m/s"));
        }
        if location.speed.is_some() && location.course.is_some() {
            remarks.push_str(", ");
        }
        if let Some(course) = location.course {
            remarks.push_str(&format!("Course: {course}\u{b0}"));
        }
        out.push_str(&format!("<remarks>{}</remarks>", xml::escape_text(&remarks)));
    }

    out.push_str("<precisionlocation altsrc=\"GPS\"/>");

    if let Some(battery) = location.battery_state() {
        out.push_str(&format!("<status battery=\"{battery}\"/>"));
    }

    out
}

fn build_team_member_detail(location: &Location, warnings: &mut Vec<String>) -> String {
    let mut out = String::new();
    let callsign = xml::escape_attr(&location.name);
    out.push_str(&format!(
        "<contact callsign=\"{callsign}\" endpoint=\"*:-1:stcp\"/>"
    ));
    out.push_str(&format!("<uid Droid=\"{callsign}\"/>"));

    let role = match location.team_role_raw() {
        Some(raw) => {
            let (role, known) = TeamRole::parse_or_default(raw);
            if !known {
                warnings.push(format!(
                    "unknown team_role {raw:?}, falling back to {}",
                    TeamRole::DEFAULT
                ));
            }
            role
        }
        None => TeamRole::DEFAULT,
    };
    let color = match location.team_color_raw() {
        Some(raw) => {
            let (color, known) = TeamColor::parse_or_default(raw);
            if !known {
                warnings.push(format!(
                    "unknown team_color {raw:?}, falling back to {}",
                    TeamColor::DEFAULT
                ));
            }
            color
        }
        None => TeamColor::DEFAULT,
    };
    out.push_str(&format!(
        "<__group name=\"{}\" role=\"{}\"/>",
        xml::escape_attr(color.as_str()),
        xml::escape_attr(role.as_str())
    ));

    if let Some(battery) = location.battery_state() {
        out.push_str(&format!("<status battery=\"{battery}\"/>"));
    }

    if location.speed.is_some() || location.course.is_some() {
        let mut track = String::from("<track");
        if let Some(speed) = location.speed {
            track.push_str(&format!(" speed=\"{}\"", format_decimal(speed)));
        }
        if let Some(course) = location.course {
            track.push_str(&format!(" course=\"{}\"", format_decimal(course)));
        }
        track.push_str("/>");
        out.push_str(&track);
    }

    out
}

/// Formats a `<track>` value so it always reads as a decimal, e.g. `315.0`
/// rather than `315` — `f64`'s `Display` drops the fractional part for
/// whole numbers, which disagrees with the CoT convention of writing
/// speed/course as floating-point literals.
fn format_decimal(value: f64) -> String {
    let s = value.to_string();
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Encodes a batch of locations serially, skipping (and logging via the
/// returned per-item result) any that fail validation. The
/// `PerformanceGovernor` decides whether a batch is encoded serially or in
/// parallel; this function is the unit of work either path calls.
pub fn encode_batch(
    locations: &[Location],
    stream_cfg: &StreamConfig,
    clock: &dyn Clock,
) -> Vec<Result<(Vec<u8>, Vec<String>), ValidationError>> {
    locations
        .iter()
        .map(|location| {
            let effective = resolve_effective_cot_type(location, stream_cfg);
            encode(location, stream_cfg, &effective, clock)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{CotTypeMode, UnmappedPolicy};
    use crate::location::AdditionalData;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;
    use std::collections::HashSet;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap())
    }

    fn stream_cfg() -> StreamConfig {
        StreamConfig {
            id: 1,
            name: "demo".into(),
            provider_kind: "garmin".into(),
            provider_config: serde_json::Map::new(),
            poll_interval_seconds: 30,
            cot_type_default: "a-f-G-F-U".into(),
            cot_stale_seconds: 120,
            attached_server_ids: HashSet::new(),
            callsign_mappings: vec![],
            cot_type_mode: CotTypeMode::Stream,
            identifier_field: "uid".into(),
            unmapped_policy: UnmappedPolicy::PassThrough,
            active: true,
        }
    }

    fn location(uid: &str, name: &str, lat: f64, lon: f64) -> Location {
        Location {
            uid: uid.into(),
            name: name.into(),
            lat,
            lon,
            timestamp: None,
            speed: None,
            course: None,
            additional_data: None,
            custom_cot_attrib: None,
        }
    }

    #[test]
    fn team_member_mapping_produces_expected_event() {
        let mut loc = location("SPOT-1", "Alpha-1", 38.8977, -77.0365);
        let mut data: AdditionalData = HashMap::new();
        data.insert("team_member_enabled".into(), json!(true));
        data.insert("team_role".into(), json!("Sniper"));
        data.insert("team_color".into(), json!("Green"));
        loc.additional_data = Some(data);

        let cfg = stream_cfg();
        let effective = resolve_effective_cot_type(&loc, &cfg);
        assert!(effective.team_member);
        assert_eq!(effective.cot_type, "a-f-G-U-C");

        let (bytes, _warnings) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0x00);
        let xml = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert!(xml.contains("type=\"a-f-G-U-C\""));
        assert!(xml.contains("how=\"h-e\""));
        assert!(xml.contains("<contact callsign=\"Alpha-1\" endpoint=\"*:-1:stcp\"/>"));
        assert!(xml.contains("<__group name=\"Green\" role=\"Sniper\"/>"));
    }

    #[test]
    fn team_member_track_formats_whole_number_course_with_decimal() {
        let mut loc = location("G-1", "G", 46.886493, 29.207861);
        loc.speed = Some(9.055);
        loc.course = Some(315.0);
        let mut data: AdditionalData = HashMap::new();
        data.insert("team_member_enabled".into(), json!(true));
        data.insert("team_role".into(), json!("Sniper"));
        data.insert("team_color".into(), json!("Green"));
        loc.additional_data = Some(data);

        let cfg = stream_cfg();
        let effective = resolve_effective_cot_type(&loc, &cfg);
        let (bytes, _warnings) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        let xml = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert!(xml.contains("<track speed=\"9.055\" course=\"315.0\"/>"));
    }

    #[test]
    fn speed_and_course_appear_in_remarks_for_standard_branch() {
        let mut loc = location("G-1", "G", 46.886493, 29.207861);
        loc.speed = Some(9.055);
        loc.course = Some(315.0);
        let cfg = stream_cfg();
        let effective = resolve_effective_cot_type(&loc, &cfg);
        let (bytes, _warnings) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        let xml = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert!(xml.contains("<remarks>"));
        assert!(xml.contains("9.055"));
        assert!(xml.contains("315"));
        assert!(!xml.contains("<track"));
    }

    #[test]
    fn protected_detail_child_is_dropped_with_warning() {
        let mut loc = location("X-1", "X", 1.0, 1.0);
        loc.custom_cot_attrib = Some(
            json!({
                "detail": {
                    "contact": { "_text": "x" },
                    "custom_field": { "_text": "ok" }
                }
            })
            .as_object()
            .unwrap()
            .clone()
            .into_iter()
            .collect(),
        );
        let cfg = stream_cfg();
        let effective = resolve_effective_cot_type(&loc, &cfg);
        let (bytes, warnings) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        let xml = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert!(xml.contains("<custom_field>ok</custom_field>"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("contact"));
    }

    #[test]
    fn invalid_location_is_skipped_not_fatal_to_batch() {
        let mut bad = location("", "name", 0.0, 0.0);
        bad.uid.clear();
        let good = location("G-2", "Good", 10.0, 10.0);
        let cfg = stream_cfg();
        let results = encode_batch(&[bad, good], &cfg, &clock());
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }

    #[test]
    fn encoding_is_deterministic_given_a_fixed_clock() {
        let loc = location("D-1", "Delta", 1.0, 2.0);
        let cfg = stream_cfg();
        let effective = resolve_effective_cot_type(&loc, &cfg);
        let (a, _) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        let (b, _) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn time_start_and_stale_invariants_hold() {
        let loc = location("D-2", "Delta", 1.0, 2.0);
        let cfg = stream_cfg();
        let effective = resolve_effective_cot_type(&loc, &cfg);
        let (bytes, _) = encode(&loc, &cfg, &effective, &clock()).unwrap();
        let xml = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert!(xml.contains("time=\"2026-08-01T12:00:00.000Z\""));
        assert!(xml.contains("start=\"2026-08-01T12:00:00.000Z\""));
        assert!(xml.contains("stale=\"2026-08-01T12:02:00.000Z\""));
    }
}
