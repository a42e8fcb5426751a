// SPDX-License-Identifier: MIT

//! Closed enumerations for the team-member CoT branch (§4.1, §9 "Dynamic-
//! typed configuration → enumerated variants"). Unknown values on input
//! fall back to the documented defaults with a warning, they are never
//! silently substituted elsewhere.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The 8 roles ATAK's `__group` extension accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamRole {
    TeamMember,
    TeamLead,
    HQ,
    Sniper,
    Medic,
    ForwardObserver,
    RTO,
    K9,
}

impl TeamRole {
    pub const DEFAULT: TeamRole = TeamRole::TeamMember;

    pub fn as_str(self) -> &'static str {
        match self {
            TeamRole::TeamMember => "Team Member",
            TeamRole::TeamLead => "Team Lead",
            TeamRole::HQ => "HQ",
            TeamRole::Sniper => "Sniper",
            TeamRole::Medic => "Medic",
            TeamRole::ForwardObserver => "Forward Observer",
            TeamRole::RTO => "RTO",
            TeamRole::K9 => "K9",
        }
    }

    /// Parses a role, falling back to [`TeamRole::DEFAULT`] for unknown
    /// input. Returns whether the input was recognised so the caller can
    /// log the fallback.
    pub fn parse_or_default(raw: &str) -> (TeamRole, bool) {
        match raw {
            "Team Member" => (TeamRole::TeamMember, true),
            "Team Lead" => (TeamRole::TeamLead, true),
            "HQ" => (TeamRole::HQ, true),
            "Sniper" => (TeamRole::Sniper, true),
            "Medic" => (TeamRole::Medic, true),
            "Forward Observer" => (TeamRole::ForwardObserver, true),
            "RTO" => (TeamRole::RTO, true),
            "K9" => (TeamRole::K9, true),
            _ => (TeamRole::DEFAULT, false),
        }
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Configuration-level enums are closed: an unknown value here is a
// ConfigurationError, unlike the encoder's own runtime fallback for values
// arriving loosely-typed inside `additional_data`.
impl Serialize for TeamRole {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TeamRole {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        let (role, known) = TeamRole::parse_or_default(&raw);
        if known {
            Ok(role)
        } else {
            Err(serde::de::Error::custom(format!(
                "unknown team_role: {raw:?}"
            )))
        }
    }
}

/// The 14 colours ATAK's `__group` extension accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamColor {
    Cyan,
    Yellow,
    Green,
    DarkGreen,
    Maroon,
    Purple,
    Red,
    Blue,
    White,
    Orange,
    Magenta,
    Brown,
    DarkBlue,
    Teal,
}

impl TeamColor {
    pub const DEFAULT: TeamColor = TeamColor::Cyan;

    pub fn as_str(self) -> &'static str {
        match self {
            TeamColor::Cyan => "Cyan",
            TeamColor::Yellow => "Yellow",
            TeamColor::Green => "Green",
            TeamColor::DarkGreen => "Dark Green",
            TeamColor::Maroon => "Maroon",
            TeamColor::Purple => "Purple",
            TeamColor::Red => "Red",
            TeamColor::Blue => "Blue",
            TeamColor::White => "White",
            TeamColor::Orange => "Orange",
            TeamColor::Magenta => "Magenta",
            TeamColor::Brown => "Brown",
            TeamColor::DarkBlue => "Dark Blue",
            TeamColor::Teal => "Teal",
        }
    }

    pub fn parse_or_default(raw: &str) -> (TeamColor, bool) {
        match raw {
            "Cyan" => (TeamColor::Cyan, true),
            "Yellow" => (TeamColor::Yellow, true),
            "Green" => (TeamColor::Green, true),
            "Dark Green" => (TeamColor::DarkGreen, true),
            "Maroon" => (TeamColor::Maroon, true),
            "Purple" => (TeamColor::Purple, true),
            "Red" => (TeamColor::Red, true),
            "Blue" => (TeamColor::Blue, true),
            "White" => (TeamColor::White, true),
            "Orange" => (TeamColor::Orange, true),
            "Magenta" => (TeamColor::Magenta, true),
            "Brown" => (TeamColor::Brown, true),
            "Dark Blue" => (TeamColor::DarkBlue, true),
            "Teal" => (TeamColor::Teal, true),
            _ => (TeamColor::DEFAULT, false),
        }
    }
}

impl fmt::Display for TeamColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TeamColor {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TeamColor {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        let (color, known) = TeamColor::parse_or_default(&raw);
        if known {
            Ok(color)
        } else {
            Err(serde::de::Error::custom(format!(
                "unknown team_color: {raw:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_falls_back_with_flag() {
        let (role, known) = TeamRole::parse_or_default("Astronaut");
        assert_eq!(role, TeamRole::DEFAULT);
        assert!(!known);
    }

    #[test]
    fn unknown_color_falls_back_with_flag() {
        let (color, known) = TeamColor::parse_or_default("Chartreuse");
        assert_eq!(color, TeamColor::DEFAULT);
        assert!(!known);
    }

    #[test]
    fn known_role_round_trips_through_as_str() {
        let (role, known) = TeamRole::parse_or_default("Sniper");
        assert!(known);
        assert_eq!(role.as_str(), "Sniper");
    }
}
