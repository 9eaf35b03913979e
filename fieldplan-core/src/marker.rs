// SPDX-License-Identifier: MIT OR Apache-2.0

//! Marker lifecycle state and the open marker kind tag.
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle state of a marker.
///
/// The full machine is enforced by the store workflow:
///
/// ```text
/// pending --assign--> assigned --acknowledge--> acknowledged
/// assigned|acknowledged --complete--> completed
/// assigned|acknowledged|completed --incomplete--> assigned
/// assigned|acknowledged --reject--> pending
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MarkerState {
    /// No agent is responsible for the marker.
    #[default]
    Pending,

    /// An agent has been made responsible but has not confirmed.
    Assigned,

    /// The assigned agent confirmed the assignment.
    Acknowledged,

    /// The task was carried out.
    Completed,
}

impl MarkerState {
    /// Canonical wire and database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerState::Pending => "pending",
            MarkerState::Assigned => "assigned",
            MarkerState::Acknowledged => "acknowledged",
            MarkerState::Completed => "completed",
        }
    }

    /// Parse a stored state string.
    ///
    /// Unknown or empty values fall back to `Pending`, mirroring how invalid enum values read
    /// back from SQL as empty strings.
    pub fn parse(value: &str) -> Self {
        match value {
            "assigned" => MarkerState::Assigned,
            "acknowledged" => MarkerState::Acknowledged,
            "completed" => MarkerState::Completed,
            _ => MarkerState::Pending,
        }
    }
}

impl Display for MarkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for MarkerState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MarkerState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        Ok(MarkerState::parse(&value))
    }
}

/// Kind of task a marker describes, for example "capture", "link" or "other".
///
/// Deliberately an open string tag rather than a closed enum: the set of marker kinds is defined
/// by clients and still growing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerKind(String);

impl MarkerKind {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarkerKind {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{MarkerKind, MarkerState};

    #[test]
    fn state_string_round_trip() {
        for state in [
            MarkerState::Pending,
            MarkerState::Assigned,
            MarkerState::Acknowledged,
            MarkerState::Completed,
        ] {
            assert_eq!(MarkerState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn unknown_state_falls_back_to_pending() {
        assert_eq!(MarkerState::parse(""), MarkerState::Pending);
        assert_eq!(MarkerState::parse("no-such-state"), MarkerState::Pending);

        let state: MarkerState = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(state, MarkerState::Pending);
    }

    #[test]
    fn kind_is_open_ended() {
        let kind = MarkerKind::from("DestroyPortalAlert");
        assert_eq!(kind.as_str(), "DestroyPortalAlert");
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            "\"DestroyPortalAlert\""
        );
    }
}
