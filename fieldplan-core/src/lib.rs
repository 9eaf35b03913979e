// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data types for collaborative field operation plans.
//!
//! An "operation" is a bounded, geo-referenced planning document: a set of named portals
//! (geographic points), directed links between them, markers (per-portal tasks with an assignment
//! lifecycle) and anchors. Operations are owned by a single agent and scoped to teams for
//! visibility.
//!
//! This crate contains only value types: opaque identifiers, the entity structs, the
//! full-snapshot [`OperationDocument`] wire format and its validation. All persistence and
//! workflow logic lives in `fieldplan-store`.
mod document;
mod identifiers;
mod marker;
mod role;

pub use document::{
    DocumentError, KeyOnHand, LinkDoc, MarkerDoc, OperationDocument, PortalDoc, TeamGrant,
};
pub use identifiers::{AgentId, IdError, LinkId, MarkerId, OperationId, PortalId, TeamId};
pub use marker::{MarkerKind, MarkerState};
pub use role::{RoleError, TeamRole};
