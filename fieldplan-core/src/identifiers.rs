// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opaque string identifiers for operations and their sub-entities.
//!
//! Identifiers are assigned by clients (operation, portal, link and marker ids travel inside the
//! uploaded document) or by external identity and team providers (agent and team ids). They are
//! treated as opaque tokens: no structure is assumed beyond being non-empty.
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for identifier parsing.
#[derive(Error, Debug)]
pub enum IdError {
    /// Identifiers must contain at least one character.
    #[error("empty {0} identifier")]
    Empty(&'static str),
}

macro_rules! string_id {
    ($name:ident, $label:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Construct from a raw string, rejecting empty input.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(IdError::Empty($label));
                }
                Ok(Self(value))
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(OperationId, "operation", "Identifier of an operation, the root planning document.");
string_id!(PortalId, "portal", "Identifier of a geographic portal within an operation.");
string_id!(LinkId, "link", "Identifier of a directed link between two portals.");
string_id!(MarkerId, "marker", "Identifier of a marker (per-portal task).");
string_id!(TeamId, "team", "Identifier of a team, the unit of shared visibility.");
string_id!(AgentId, "agent", "Identifier of an authenticated agent.");
