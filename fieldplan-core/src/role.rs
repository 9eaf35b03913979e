// SPDX-License-Identifier: MIT OR Apache-2.0

//! Team permission roles on an operation.
use std::fmt::Display;
use std::str::FromStr;

use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Role a team holds on an operation.
///
/// Roles are not ordered: `AssignedOnly` grants a member visibility of their own assignments
/// only, which is neither a subset nor a superset of `Read`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeamRole {
    /// Members may fetch the full operation.
    Read,

    /// Members may be granted editing rights.
    ///
    /// Currently recorded but not consulted for write decisions: write access is owner-only.
    Write,

    /// Members only see the items assigned to them.
    AssignedOnly,
}

impl TeamRole {
    /// Canonical wire and database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamRole::Read => "read",
            TeamRole::Write => "write",
            TeamRole::AssignedOnly => "assignedonly",
        }
    }
}

impl Display for TeamRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TeamRole {
    type Err = RoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "read" => Ok(TeamRole::Read),
            "write" => Ok(TeamRole::Write),
            "assignedonly" => Ok(TeamRole::AssignedOnly),
            other => Err(RoleError::UnknownRole(other.to_string())),
        }
    }
}

impl Serialize for TeamRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TeamRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|err: RoleError| SerdeError::custom(err.to_string()))
    }
}

/// Error types for `TeamRole` parsing.
#[derive(Error, Debug)]
pub enum RoleError {
    /// Role is not one of "read", "write" or "assignedonly".
    #[error("unknown team role '{0}'")]
    UnknownRole(String),
}
