// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document synchronization: converging the stored operation onto an uploaded full snapshot.
//!
//! Clients always upload the complete document. The engine reconciles each child collection by
//! set difference against the stored rows inside a single transaction: rows in the document are
//! upserted, stored rows absent from the document are deleted, and nothing else is touched. A
//! second upload of the same document therefore converges to the identical database state.
//!
//! Portals are the referential backbone, so they are written first and pruned last; by the time
//! links and markers are upserted every portal they reference exists, and pruning a portal
//! cascades to whatever still hangs off it.
use std::collections::HashSet;

use fieldplan_core::{AgentId, MarkerState, OperationDocument, OperationId};
use tracing::debug;

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::operations::{self, OperationStore, now_ms};
use crate::sqlite::{SqliteError, SqliteStore, Transaction};
use crate::{anchors, links, markers, portals, teams};

/// Whole-document ingestion.
pub trait SyncEngine {
    /// Create an operation from an uploaded document.
    ///
    /// The acting agent becomes the owner regardless of what the document claims, and the
    /// document's team grants are recorded. Fails with [`OpError::Conflict`] when the id is
    /// already taken; nothing is written in that case.
    fn insert(
        &self,
        doc: &OperationDocument,
        agent: &AgentId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Converge an existing operation onto an uploaded document. Requires write access.
    ///
    /// Root attributes are overwritten and the child collections reconciled by set difference.
    /// Ownership, team grants and key counts are not part of the document contract and stay
    /// untouched; they have their own APIs. The change-version is restamped once.
    fn update(
        &self,
        doc: &OperationDocument,
        agent: &AgentId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Duplicate an operation under a fresh id, owned by the acting agent. Restricted to the
    /// owner.
    ///
    /// Child entity ids are retained under the new operation id. Assignment and completion
    /// state is reset unless `include_completion` is set. Team grants and key counts are not
    /// carried over.
    fn copy(
        &self,
        op: &OperationId,
        agent: &AgentId,
        include_completion: bool,
    ) -> impl Future<Output = Result<OperationId, OpError>>;
}

impl SyncEngine for SqliteStore<'_> {
    async fn insert(&self, doc: &OperationDocument, agent: &AgentId) -> Result<(), OpError> {
        doc.validate()?;
        if self.stat(&doc.id).await?.is_some() {
            return Err(OpError::Conflict(doc.id.clone()));
        }

        let permit = self.begin().await?;
        let result = self
            .tx(async |tx| {
                operations::insert_root_row(tx, doc, agent, now_ms()).await?;
                converge(tx, doc).await?;
                for grant in &doc.team_grants {
                    teams::insert_grant(tx, &doc.id, grant).await?;
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                self.commit(permit).await?;
                Ok(())
            }
            Err(err) => {
                self.rollback(permit).await?;
                // The duplicate-id precheck runs outside the transaction, so a concurrent
                // insert can still land first and surface as a unique violation on the root
                // row. Validation excludes duplicate child ids, leaving the root row as the
                // only source of one.
                if is_unique_violation(&err) {
                    return Err(OpError::Conflict(doc.id.clone()));
                }
                Err(err.into())
            }
        }
    }

    async fn update(&self, doc: &OperationDocument, agent: &AgentId) -> Result<(), OpError> {
        doc.validate()?;
        if self.stat(&doc.id).await?.is_none() {
            return Err(OpError::NotFound);
        }
        if !self.write_access(&doc.id, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let permit = self.begin().await?;
        let result = self
            .tx(async |tx| {
                operations::update_root_row(tx, &doc.id, doc).await?;
                converge(tx, doc).await?;
                operations::touch_in_tx(tx, &doc.id).await?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                self.commit(permit).await?;
                Ok(())
            }
            Err(err) => {
                self.rollback(permit).await?;
                Err(err.into())
            }
        }
    }

    async fn copy(
        &self,
        op: &OperationId,
        agent: &AgentId,
        include_completion: bool,
    ) -> Result<OperationId, OpError> {
        if !self.is_owner(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let mut doc = self.populate(op, agent).await?;
        let new_id = OperationId::new(format!("{:032x}", rand::random::<u128>()))
            .map_err(|err| OpError::Storage(SqliteError::Decode("operation".into(), err.into())))?;
        debug!(%op, %new_id, include_completion, "copying operation");

        doc.id = new_id.clone();
        doc.team_grants.clear();
        doc.keys_on_hand.clear();
        if !include_completion {
            for link in &mut doc.links {
                link.assigned_to = None;
                link.completed = false;
            }
            for marker in &mut doc.markers {
                marker.assigned_to = None;
                marker.completed_by = None;
                marker.state = MarkerState::Pending;
            }
        }

        self.insert(&doc, agent).await?;
        Ok(new_id)
    }
}

/// Reconcile all child collections of `doc` inside the open transaction.
///
/// The document must have passed [`OperationDocument::validate`] before this is called.
async fn converge(tx: &mut Transaction<'_>, doc: &OperationDocument) -> Result<(), SqliteError> {
    let op = &doc.id;

    let stored_portals = portals::stored_ids(tx, op).await?;
    let stored_links = links::stored_ids(tx, op).await?;
    let stored_markers = markers::stored_ids(tx, op).await?;
    let stored_anchors = anchors::stored_ids(tx, op).await?;

    for portal in &doc.portals {
        portals::upsert(tx, op, portal).await?;
    }

    let wanted: HashSet<&str> = doc.links.iter().map(|link| link.id.as_str()).collect();
    for link in &doc.links {
        links::upsert(tx, op, link).await?;
    }
    for id in stale(&stored_links, &wanted) {
        links::delete(tx, op, id).await?;
    }

    let wanted: HashSet<&str> = doc
        .markers
        .iter()
        .map(|marker| marker.id.as_str())
        .collect();
    for marker in &doc.markers {
        markers::upsert(tx, op, marker).await?;
    }
    for id in stale(&stored_markers, &wanted) {
        markers::delete(tx, op, id).await?;
    }

    let wanted: HashSet<&str> = doc
        .anchors
        .iter()
        .map(|anchor| anchor.as_str())
        .collect();
    for anchor in &doc.anchors {
        anchors::upsert(tx, op, anchor).await?;
    }
    for id in stale(&stored_anchors, &wanted) {
        anchors::delete(tx, op, id).await?;
    }

    // Portals last: anything still referencing a pruned portal was itself pruned above, the
    // cascade only mops up key counts.
    let wanted: HashSet<&str> = doc
        .portals
        .iter()
        .map(|portal| portal.id.as_str())
        .collect();
    for id in stale(&stored_portals, &wanted) {
        portals::delete(tx, op, id).await?;
    }

    Ok(())
}

fn is_unique_violation(err: &SqliteError) -> bool {
    matches!(
        err,
        SqliteError::Sqlite(sqlx::Error::Database(db))
            if db.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

/// Stored ids absent from the uploaded document.
fn stale<'a>(stored: &'a [String], wanted: &'a HashSet<&str>) -> impl Iterator<Item = &'a str> {
    stored
        .iter()
        .map(String::as_str)
        .filter(|id| !wanted.contains(id))
}

#[cfg(test)]
mod tests {
    use fieldplan_core::MarkerState;

    use crate::error::OpError;
    use crate::operations::OperationStore;
    use crate::sqlite::SqliteStore;
    use crate::test_utils::{agent, link, sample_document, seeded};

    use super::SyncEngine;

    #[tokio::test]
    async fn insert_then_populate_round_trips() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;

        let doc = store
            .populate(&"op1".parse().unwrap(), &owner)
            .await
            .unwrap();
        assert_eq!(doc.owner.as_ref(), Some(&owner));
        assert_eq!(doc.portals.len(), 2);
        assert_eq!(doc.links.len(), 1);
        assert_eq!(doc.markers.len(), 1);
        assert_eq!(doc.anchors.len(), 1);
        assert!(doc.modified > 0);
    }

    #[tokio::test]
    async fn insert_rejects_taken_id() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;

        let result = store.insert(&sample_document("op1"), &agent("other")).await;
        assert!(matches!(result, Err(OpError::Conflict(_))));

        // The original survives untouched.
        let doc = store
            .populate(&"op1".parse().unwrap(), &owner)
            .await
            .unwrap();
        assert_eq!(doc.owner.as_ref(), Some(&owner));
    }

    #[tokio::test]
    async fn racing_inserts_agree_on_conflict() {
        let owner = agent("deviousness");
        let store = SqliteStore::temporary().await;
        let doc = sample_document("op1");

        // Both calls pass the duplicate-id precheck before either commits; the loser must
        // still surface the typed conflict, not a storage failure.
        let (first, second) = tokio::join!(store.insert(&doc, &owner), store.insert(&doc, &owner));
        let results = [first, second];
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|result| matches!(result, Err(OpError::Conflict(_))))
        );
    }

    #[tokio::test]
    async fn completed_unassigned_marker_is_stored_pending() {
        let owner = agent("deviousness");
        let store = SqliteStore::temporary().await;
        let mut doc = sample_document("op1");
        doc.markers[0].state = MarkerState::Completed;
        store.insert(&doc, &owner).await.unwrap();

        let stored = store
            .populate(&"op1".parse().unwrap(), &owner)
            .await
            .unwrap();
        assert_eq!(stored.markers[0].state, MarkerState::Pending);
        assert!(stored.markers[0].completed_by.is_none());
    }

    #[tokio::test]
    async fn update_reconciles_by_set_difference() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op = "op1".parse().unwrap();
        let before = store.modified(&op).await.unwrap();

        // Replace link l1 with l2; portals and marker stay.
        let mut doc = sample_document("op1");
        doc.links = vec![link("l2", "p2", "p1", 1.0)];
        store.update(&doc, &owner).await.unwrap();

        let stored = store.populate(&op, &owner).await.unwrap();
        let ids: Vec<&str> = stored.links.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["l2"]);
        assert_eq!(stored.portals.len(), 2);
        assert_eq!(stored.markers.len(), 1);
        assert!(stored.modified > before);
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op = "op1".parse().unwrap();
        let doc = sample_document("op1");

        store.update(&doc, &owner).await.unwrap();
        let first = store.populate(&op, &owner).await.unwrap();

        store.update(&doc, &owner).await.unwrap();
        let second = store.populate(&op, &owner).await.unwrap();

        assert_eq!(
            serde_json::to_value(&first.portals).unwrap(),
            serde_json::to_value(&second.portals).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&first.links).unwrap(),
            serde_json::to_value(&second.links).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&first.markers).unwrap(),
            serde_json::to_value(&second.markers).unwrap()
        );
        // Only the change-version moves, strictly forward.
        assert!(second.modified > first.modified);
    }

    #[tokio::test]
    async fn invalid_document_applies_nothing() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op = "op1".parse().unwrap();
        let before = store.modified(&op).await.unwrap();

        // Link referencing a portal the document does not carry.
        let mut doc = sample_document("op1");
        doc.name = "renamed".to_string();
        doc.links.push(link("l9", "p1", "nowhere", 2.0));

        let result = store.update(&doc, &owner).await;
        assert!(matches!(result, Err(OpError::InvalidDocument(_))));

        let stored = store.populate(&op, &owner).await.unwrap();
        assert_eq!(stored.name, "Operation op1");
        assert_eq!(stored.links.len(), 1);
        assert_eq!(stored.modified, before);
    }

    #[tokio::test]
    async fn update_requires_write_access() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;

        let result = store.update(&sample_document("op1"), &agent("stranger")).await;
        assert!(matches!(result, Err(OpError::PermissionDenied)));
    }

    #[tokio::test]
    async fn removing_a_portal_removes_it_from_the_aggregate() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op = "op1".parse().unwrap();

        // Everything referencing p2 has to go with it for the document to validate.
        let mut doc = sample_document("op1");
        doc.portals.retain(|p| p.id.as_str() != "p2");
        doc.links.clear();
        doc.markers.clear();
        store.update(&doc, &owner).await.unwrap();

        let stored = store.populate(&op, &owner).await.unwrap();
        let ids: Vec<&str> = stored.portals.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1"]);
        assert!(stored.links.is_empty());
        assert!(stored.markers.is_empty());
    }

    #[tokio::test]
    async fn copy_resets_workflow_state() {
        let owner = agent("deviousness");
        let store = SqliteStore::temporary().await;
        let mut doc = sample_document("op1");
        doc.links[0].assigned_to = Some(agent("ringbearer"));
        doc.links[0].completed = true;
        doc.markers[0].assigned_to = Some(agent("ringbearer"));
        store.insert(&doc, &owner).await.unwrap();

        let copy_id = store
            .copy(&"op1".parse().unwrap(), &owner, false)
            .await
            .unwrap();
        let copy = store.populate(&copy_id, &owner).await.unwrap();
        assert!(copy.links[0].assigned_to.is_none());
        assert!(!copy.links[0].completed);
        assert!(copy.markers[0].assigned_to.is_none());
        assert_eq!(copy.markers[0].state, MarkerState::Pending);
        assert_eq!(copy.owner.as_ref(), Some(&owner));

        let kept = store
            .copy(&"op1".parse().unwrap(), &owner, true)
            .await
            .unwrap();
        let kept = store.populate(&kept, &owner).await.unwrap();
        assert!(kept.links[0].completed);
        assert_eq!(kept.markers[0].state, MarkerState::Assigned);
    }

    #[tokio::test]
    async fn copy_restricted_to_owner() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;

        let result = store
            .copy(&"op1".parse().unwrap(), &agent("stranger"), false)
            .await;
        assert!(matches!(result, Err(OpError::PermissionDenied)));
    }
}
