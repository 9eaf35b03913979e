// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for engine tests.
use fieldplan_core::{
    AgentId, LinkDoc, MarkerDoc, MarkerKind, MarkerState, OperationDocument, PortalDoc,
};

use crate::sqlite::SqliteStore;
use crate::sync::SyncEngine;

pub fn agent(name: &str) -> AgentId {
    name.parse().expect("valid agent id")
}

pub fn portal(id: &str, name: &str) -> PortalDoc {
    PortalDoc {
        id: id.parse().expect("valid portal id"),
        name: name.to_string(),
        lat: "53.5511".to_string(),
        lon: "9.9937".to_string(),
        comment: None,
        hardness: None,
    }
}

pub fn link(id: &str, from: &str, to: &str, throw_order: f64) -> LinkDoc {
    LinkDoc {
        id: id.parse().expect("valid link id"),
        from: from.parse().expect("valid portal id"),
        to: to.parse().expect("valid portal id"),
        description: None,
        assigned_to: None,
        throw_order,
        completed: false,
        color: "main".to_string(),
    }
}

pub fn marker(id: &str, portal: &str, kind: &str) -> MarkerDoc {
    MarkerDoc {
        id: id.parse().expect("valid marker id"),
        portal_id: portal.parse().expect("valid portal id"),
        kind: MarkerKind::from(kind),
        comment: None,
        assigned_to: None,
        completed_by: None,
        state: MarkerState::Pending,
        order: 0,
    }
}

/// Two portals, one link between them, one marker and one anchor, scoped to "team-1".
pub fn sample_document(op: &str) -> OperationDocument {
    OperationDocument {
        id: op.parse().expect("valid operation id"),
        name: format!("Operation {op}"),
        owner: None,
        color: "main".to_string(),
        team_id: Some("team-1".parse().expect("valid team id")),
        comment: None,
        modified: 0,
        portals: vec![
            portal("p1", "Telegraph Hill"),
            portal("p2", "Coit Tower"),
        ],
        links: vec![link("l1", "p1", "p2", 1.0)],
        markers: vec![marker("m1", "p2", "capture")],
        anchors: vec!["p1".parse().expect("valid portal id")],
        team_grants: vec![],
        keys_on_hand: vec![],
    }
}

/// Fresh in-memory store seeded with [`sample_document`], owned by `owner`.
pub async fn seeded(op: &str, owner: &AgentId) -> SqliteStore<'static> {
    let store = SqliteStore::temporary().await;
    store
        .insert(&sample_document(op), owner)
        .await
        .expect("seeding succeeds");
    store
}
