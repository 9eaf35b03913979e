// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full-snapshot operation document.
//!
//! Clients never mutate sub-entities directly through a document: they upload the complete
//! operation as one JSON snapshot and the store reconciles persisted state against it. The same
//! structure is used on the read side when assembling an operation from the store.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::{AgentId, LinkId, MarkerId, OperationId, PortalId, TeamId};
use crate::marker::{MarkerKind, MarkerState};
use crate::role::TeamRole;

fn default_color() -> String {
    "main".to_string()
}

/// A complete operation snapshot: the root attributes and every child collection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationDocument {
    pub id: OperationId,
    pub name: String,

    /// Owning agent. Ignored on upload: inserts are always self-owned by the acting agent and
    /// ownership changes only through an explicit transfer.
    #[serde(default)]
    pub owner: Option<AgentId>,

    #[serde(default = "default_color")]
    pub color: String,

    /// Primary team scoping visibility of the operation.
    #[serde(rename = "teamID", default)]
    pub team_id: Option<TeamId>,

    #[serde(default)]
    pub comment: Option<String>,

    /// Change-version stamp in unix milliseconds. Server-assigned; ignored on upload.
    #[serde(default)]
    pub modified: i64,

    #[serde(default)]
    pub portals: Vec<PortalDoc>,

    #[serde(default)]
    pub links: Vec<LinkDoc>,

    #[serde(default)]
    pub markers: Vec<MarkerDoc>,

    /// Portals marked as structurally significant to the layout.
    #[serde(default)]
    pub anchors: Vec<PortalId>,

    /// Per-team permission grants. Maintained through the permission API, echoed here on reads.
    #[serde(rename = "teamGrants", default)]
    pub team_grants: Vec<TeamGrant>,

    /// Per-agent key counts. Maintained through the key API, echoed here on reads.
    #[serde(rename = "keysOnHand", default)]
    pub keys_on_hand: Vec<KeyOnHand>,
}

/// A named geographic point.
///
/// Latitude and longitude are text-preserving decimal strings: they are never parsed into floats
/// on the server so client-submitted coordinates round-trip without drift.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalDoc {
    pub id: PortalId,
    pub name: String,
    pub lat: String,
    pub lon: String,

    #[serde(default)]
    pub comment: Option<String>,

    /// Free-form difficulty classification, for example "booster required".
    #[serde(default)]
    pub hardness: Option<String>,
}

/// A directed edge between two portals of the same operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkDoc {
    pub id: LinkId,
    pub from: PortalId,
    pub to: PortalId,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(rename = "assignedTo", default)]
    pub assigned_to: Option<AgentId>,

    /// Explicit sequencing position. A float so clients can insert between two throws without
    /// renumbering.
    #[serde(rename = "throwOrder", default)]
    pub throw_order: f64,

    #[serde(default)]
    pub completed: bool,

    #[serde(default = "default_color")]
    pub color: String,
}

/// A task bound to one portal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerDoc {
    pub id: MarkerId,

    #[serde(rename = "portalId")]
    pub portal_id: PortalId,

    #[serde(rename = "type")]
    pub kind: MarkerKind,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(rename = "assignedTo", default)]
    pub assigned_to: Option<AgentId>,

    /// Agent who marked the task done. May differ from the assignee after reassignment.
    #[serde(rename = "completedBy", default)]
    pub completed_by: Option<AgentId>,

    #[serde(default)]
    pub state: MarkerState,

    #[serde(default)]
    pub order: i64,
}

impl MarkerDoc {
    /// Re-establish the marker invariants before persisting:
    ///
    /// - `state == Pending` if and only if no agent is assigned,
    /// - `completed_by` is set if and only if `state == Completed`.
    ///
    /// Clients routinely send one side of these pairs without the other, so mismatches are
    /// repaired rather than rejected.
    pub fn normalized(mut self) -> Self {
        match (&self.assigned_to, self.state) {
            (None, MarkerState::Assigned | MarkerState::Acknowledged | MarkerState::Completed) => {
                self.state = MarkerState::Pending;
            }
            (Some(_), MarkerState::Pending) => {
                self.state = MarkerState::Assigned;
            }
            _ => {}
        }
        if self.state == MarkerState::Completed {
            // A completed upload without a completing agent credits the assignee.
            if self.completed_by.is_none() {
                self.completed_by = self.assigned_to.clone();
            }
        } else {
            self.completed_by = None;
        }
        self
    }
}

/// A (team, role) permission grant on an operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamGrant {
    #[serde(rename = "teamID")]
    pub team_id: TeamId,
    pub role: TeamRole,
}

/// Number of portal keys an agent holds, optionally with the capsule they are stored in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOnHand {
    pub portal_id: PortalId,
    pub agent_id: AgentId,
    pub on_hand: i64,

    #[serde(default)]
    pub capsule: Option<String>,
}

/// Error types for malformed or referentially inconsistent documents.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("missing required field '{0}'")]
    EmptyField(&'static str),

    #[error("duplicate {0} id '{1}' in document")]
    DuplicateId(&'static str, String),

    #[error("{entity} '{id}' references unknown portal '{portal}'")]
    UnknownPortal {
        entity: &'static str,
        id: String,
        portal: String,
    },
}

impl OperationDocument {
    /// Check structural consistency of the snapshot.
    ///
    /// Links, markers and anchors may only reference portals carried in the same document; the
    /// document is the complete portal set after convergence, so anything outside it would leave
    /// a dangling reference in the store.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.name.is_empty() {
            return Err(DocumentError::EmptyField("name"));
        }

        let mut portals = HashSet::new();
        for portal in &self.portals {
            if !portals.insert(&portal.id) {
                return Err(DocumentError::DuplicateId(
                    "portal",
                    portal.id.to_string(),
                ));
            }
        }

        let mut links = HashSet::new();
        for link in &self.links {
            if !links.insert(&link.id) {
                return Err(DocumentError::DuplicateId("link", link.id.to_string()));
            }
            for portal in [&link.from, &link.to] {
                if !portals.contains(portal) {
                    return Err(DocumentError::UnknownPortal {
                        entity: "link",
                        id: link.id.to_string(),
                        portal: portal.to_string(),
                    });
                }
            }
        }

        let mut markers = HashSet::new();
        for marker in &self.markers {
            if !markers.insert(&marker.id) {
                return Err(DocumentError::DuplicateId("marker", marker.id.to_string()));
            }
            if !portals.contains(&marker.portal_id) {
                return Err(DocumentError::UnknownPortal {
                    entity: "marker",
                    id: marker.id.to_string(),
                    portal: marker.portal_id.to_string(),
                });
            }
        }

        for anchor in &self.anchors {
            if !portals.contains(anchor) {
                return Err(DocumentError::UnknownPortal {
                    entity: "anchor",
                    id: anchor.to_string(),
                    portal: anchor.to_string(),
                });
            }
        }

        Ok(())
    }
}
