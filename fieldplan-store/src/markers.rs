// SPDX-License-Identifier: MIT OR Apache-2.0

//! Marker rows and the assignment state machine.
//!
//! Unlike links, markers carry an explicit lifecycle state. Every transition here validates the
//! current state first and leaves the row untouched when the transition is invalid, so a rejected
//! call never half-applies.
use fieldplan_core::{AgentId, MarkerDoc, MarkerId, MarkerKind, MarkerState, OperationId, PortalId};
use sqlx::{query, query_as};

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::notify::{Notifier, dispatch};
use crate::operations::OperationStore;
use crate::sqlite::{SqliteError, SqliteStore, Transaction, decode};

/// Marker assignment workflow.
///
/// All transitions restamp the operation's change-version on success.
pub trait MarkerStore {
    /// Set or clear the agent responsible for a marker. Requires write access.
    ///
    /// Assigning moves the marker to `assigned` and notifies the new assignee; clearing the
    /// assignment returns it to `pending`.
    fn assign_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        assignee: Option<&AgentId>,
        notifier: &N,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Confirm an assignment. Only the exact assignee may acknowledge, and only from the
    /// `assigned` state.
    fn acknowledge_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Refuse an assignment. Only the exact assignee may reject; the marker returns to
    /// `pending` and the assignment is cleared.
    fn reject_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Mark the task as carried out, recording the acting agent as `completed_by`.
    ///
    /// Gated on read access, not write: any agent who can see the operation may report
    /// completion of an assigned or acknowledged marker.
    fn complete_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Undo a completion (or confirmation), returning the marker to `assigned` and clearing
    /// `completed_by`. Gated on read access like [`MarkerStore::complete_marker`].
    fn incomplete_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Update the free-text comment. Requires write access.
    fn set_marker_comment(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        comment: Option<&str>,
    ) -> impl Future<Output = Result<(), OpError>>;
}

impl MarkerStore for SqliteStore<'_> {
    async fn assign_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        assignee: Option<&AgentId>,
        notifier: &N,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let state = match assignee {
            Some(_) => MarkerState::Assigned,
            None => MarkerState::Pending,
        };

        let affected = self
            .execute(async |pool| {
                let result = query(
                    "
                    UPDATE markers_v1
                    SET assigned_to = ?1, state = ?2, completed_by = NULL
                    WHERE op_id = ?3 AND id = ?4
                    ",
                )
                .bind(assignee.map(AgentId::as_str))
                .bind(state.as_str())
                .bind(op.as_str())
                .bind(marker.as_str())
                .execute(pool)
                .await?;
                Ok(result.rows_affected())
            })
            .await?;
        if affected == 0 {
            return Err(OpError::NotFound);
        }

        if let Some(assignee) = assignee {
            dispatch(
                notifier,
                assignee,
                "marker_assigned",
                &format!("assigned marker {marker} in operation {op}"),
            )
            .await;
        }

        self.touch(op).await
    }

    async fn acknowledge_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> Result<(), OpError> {
        let (assigned_to, state) = current(self, op, marker).await?;
        let assignee = require_assignee(assigned_to, agent)?;
        if state != MarkerState::Assigned {
            return Err(OpError::NotAssigned);
        }

        transition(self, op, marker, MarkerState::Acknowledged).await?;
        dispatch(
            notifier,
            &assignee,
            "marker_acknowledged",
            &format!("marker {marker} acknowledged in operation {op}"),
        )
        .await;

        self.touch(op).await
    }

    async fn reject_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> Result<(), OpError> {
        let (assigned_to, state) = current(self, op, marker).await?;
        let assignee = require_assignee(assigned_to, agent)?;
        if !matches!(state, MarkerState::Assigned | MarkerState::Acknowledged) {
            return Err(OpError::NotAssigned);
        }

        self.execute(async |pool| {
            query(
                "
                UPDATE markers_v1
                SET state = 'pending', assigned_to = NULL
                WHERE op_id = ?1 AND id = ?2
                ",
            )
            .bind(op.as_str())
            .bind(marker.as_str())
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        dispatch(
            notifier,
            &assignee,
            "marker_rejected",
            &format!("marker {marker} rejected in operation {op}"),
        )
        .await;

        self.touch(op).await
    }

    async fn complete_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> Result<(), OpError> {
        if !self.read_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let (assigned_to, state) = current(self, op, marker).await?;
        if !matches!(state, MarkerState::Assigned | MarkerState::Acknowledged) {
            return Err(OpError::NotAssigned);
        }

        self.execute(async |pool| {
            query(
                "
                UPDATE markers_v1
                SET state = 'completed', completed_by = ?1
                WHERE op_id = ?2 AND id = ?3
                ",
            )
            .bind(agent.as_str())
            .bind(op.as_str())
            .bind(marker.as_str())
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        if let Some(assignee) = assigned_to {
            dispatch(
                notifier,
                &assignee,
                "marker_completed",
                &format!("marker {marker} completed in operation {op}"),
            )
            .await;
        }

        self.touch(op).await
    }

    async fn incomplete_marker<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        notifier: &N,
    ) -> Result<(), OpError> {
        if !self.read_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let (assigned_to, state) = current(self, op, marker).await?;
        if state == MarkerState::Pending {
            return Err(OpError::NotAssigned);
        }

        self.execute(async |pool| {
            query(
                "
                UPDATE markers_v1
                SET state = 'assigned', completed_by = NULL
                WHERE op_id = ?1 AND id = ?2
                ",
            )
            .bind(op.as_str())
            .bind(marker.as_str())
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        if let Some(assignee) = assigned_to {
            dispatch(
                notifier,
                &assignee,
                "marker_incomplete",
                &format!("marker {marker} reopened in operation {op}"),
            )
            .await;
        }

        self.touch(op).await
    }

    async fn set_marker_comment(
        &self,
        op: &OperationId,
        agent: &AgentId,
        marker: &MarkerId,
        comment: Option<&str>,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("UPDATE markers_v1 SET comment = ?1 WHERE op_id = ?2 AND id = ?3")
                .bind(comment)
                .bind(op.as_str())
                .bind(marker.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;

        self.touch(op).await
    }
}

/// Assignment and state of one marker, as stored.
async fn current(
    store: &SqliteStore<'_>,
    op: &OperationId,
    marker: &MarkerId,
) -> Result<(Option<AgentId>, MarkerState), OpError> {
    let row = store
        .execute(async |pool| {
            let row: Option<(Option<String>, String)> =
                query_as("SELECT assigned_to, state FROM markers_v1 WHERE op_id = ?1 AND id = ?2")
                    .bind(op.as_str())
                    .bind(marker.as_str())
                    .fetch_optional(pool)
                    .await?;
            Ok(row)
        })
        .await?;

    let Some((assigned_to, state)) = row else {
        return Err(OpError::NotFound);
    };
    let assigned_to = decode("agent", assigned_to.map(AgentId::new).transpose())?;
    Ok((assigned_to, MarkerState::parse(&state)))
}

/// Assignee-only actions require an assignment and the exact acting agent.
fn require_assignee(assigned_to: Option<AgentId>, agent: &AgentId) -> Result<AgentId, OpError> {
    let Some(assignee) = assigned_to else {
        return Err(OpError::NotAssigned);
    };
    if &assignee != agent {
        return Err(OpError::WrongAssignee);
    }
    Ok(assignee)
}

async fn transition(
    store: &SqliteStore<'_>,
    op: &OperationId,
    marker: &MarkerId,
    to: MarkerState,
) -> Result<(), OpError> {
    store
        .execute(async |pool| {
            query("UPDATE markers_v1 SET state = ?1 WHERE op_id = ?2 AND id = ?3")
                .bind(to.as_str())
                .bind(op.as_str())
                .bind(marker.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;
    Ok(())
}

/// All markers of an operation in sort order.
pub(crate) async fn list_markers(
    store: &SqliteStore<'_>,
    op: &OperationId,
) -> Result<Vec<MarkerDoc>, SqliteError> {
    type MarkerRow = (
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        i64,
    );

    let rows = store
        .execute(async |pool| {
            let rows: Vec<MarkerRow> = query_as(
                "
                SELECT id, portal_id, kind, comment, assigned_to, completed_by, state, sort_order
                FROM markers_v1
                WHERE op_id = ?1
                ORDER BY sort_order, id
                ",
            )
            .bind(op.as_str())
            .fetch_all(pool)
            .await?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(
            |(id, portal_id, kind, comment, assigned_to, completed_by, state, order)| {
                Ok(MarkerDoc {
                    id: decode("marker", MarkerId::new(id))?,
                    portal_id: decode("portal", PortalId::new(portal_id))?,
                    kind: MarkerKind::new(kind),
                    comment,
                    assigned_to: decode("agent", assigned_to.map(AgentId::new).transpose())?,
                    completed_by: decode("agent", completed_by.map(AgentId::new).transpose())?,
                    state: MarkerState::parse(&state),
                    order,
                })
            },
        )
        .collect()
}

/// Ids of all markers currently persisted for an operation, read inside the sync transaction.
pub(crate) async fn stored_ids(
    tx: &mut Transaction<'_>,
    op: &OperationId,
) -> Result<Vec<String>, SqliteError> {
    let rows: Vec<(String,)> = query_as("SELECT id FROM markers_v1 WHERE op_id = ?1")
        .bind(op.as_str())
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert or update one marker from a document.
///
/// The marker is normalized first so an inconsistent upload (for example a "completed" state
/// without a completing agent) can never reach the database.
pub(crate) async fn upsert(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    marker: &MarkerDoc,
) -> Result<(), SqliteError> {
    let marker = marker.clone().normalized();
    query(
        "
        INSERT INTO
            markers_v1 (op_id, id, portal_id, kind, comment, assigned_to, completed_by, state,
                        sort_order)
        VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (op_id, id) DO UPDATE
            SET portal_id = ?3, kind = ?4, comment = ?5, assigned_to = ?6, completed_by = ?7,
                state = ?8, sort_order = ?9
        ",
    )
    .bind(op.as_str())
    .bind(marker.id.as_str())
    .bind(marker.portal_id.as_str())
    .bind(marker.kind.as_str())
    .bind(marker.comment.as_deref())
    .bind(marker.assigned_to.as_ref().map(AgentId::as_str))
    .bind(marker.completed_by.as_ref().map(AgentId::as_str))
    .bind(marker.state.as_str())
    .bind(marker.order)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Delete one marker.
pub(crate) async fn delete(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    marker: &str,
) -> Result<(), SqliteError> {
    query("DELETE FROM markers_v1 WHERE op_id = ?1 AND id = ?2")
        .bind(op.as_str())
        .bind(marker)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use fieldplan_core::{AgentId, MarkerState, OperationId};

    use crate::error::OpError;
    use crate::notify::test_utils::RecordingNotifier;
    use crate::operations::OperationStore;
    use crate::sqlite::SqliteStore;
    use crate::teams::TeamStore;
    use crate::test_utils::{agent, seeded};

    use super::MarkerStore;

    async fn marker_state(
        store: &SqliteStore<'_>,
        op: &OperationId,
        owner: &AgentId,
    ) -> (MarkerState, Option<String>, Option<String>) {
        let doc = store.populate(op, owner).await.unwrap();
        let marker = &doc.markers[0];
        (
            marker.state,
            marker.assigned_to.as_ref().map(|a| a.to_string()),
            marker.completed_by.as_ref().map(|a| a.to_string()),
        )
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let owner = agent("deviousness");
        let assignee = agent("ringbearer");
        let teammate = agent("lurker");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let marker = "m1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        // Both non-owners can see the op through its primary team.
        for member in [&assignee, &teammate] {
            let team = "team-1".parse().unwrap();
            store.add_member(&team, member).await.unwrap();
            store.set_member_state(&team, member, true).await.unwrap();
        }

        store
            .assign_marker(&op, &owner, &marker, Some(&assignee), &notifier)
            .await
            .unwrap();
        let (state, assigned, _) = marker_state(&store, &op, &owner).await;
        assert_eq!(state, MarkerState::Assigned);
        assert_eq!(assigned.as_deref(), Some("ringbearer"));
        assert_eq!(notifier.events()[0].1, "marker_assigned");

        // Only the exact assignee may acknowledge.
        assert!(matches!(
            store
                .acknowledge_marker(&op, &teammate, &marker, &notifier)
                .await,
            Err(OpError::WrongAssignee)
        ));

        store
            .acknowledge_marker(&op, &assignee, &marker, &notifier)
            .await
            .unwrap();
        let (state, _, _) = marker_state(&store, &op, &owner).await;
        assert_eq!(state, MarkerState::Acknowledged);

        // Acknowledging twice is an invalid transition and changes nothing.
        assert!(matches!(
            store
                .acknowledge_marker(&op, &assignee, &marker, &notifier)
                .await,
            Err(OpError::NotAssigned)
        ));
        let (state, _, _) = marker_state(&store, &op, &owner).await;
        assert_eq!(state, MarkerState::Acknowledged);

        // Any reader may report completion, recorded under their own name.
        store
            .complete_marker(&op, &teammate, &marker, &notifier)
            .await
            .unwrap();
        let (state, _, completed_by) = marker_state(&store, &op, &owner).await;
        assert_eq!(state, MarkerState::Completed);
        assert_eq!(completed_by.as_deref(), Some("lurker"));

        store
            .incomplete_marker(&op, &owner, &marker, &notifier)
            .await
            .unwrap();
        let (state, assigned, completed_by) = marker_state(&store, &op, &owner).await;
        assert_eq!(state, MarkerState::Assigned);
        assert_eq!(assigned.as_deref(), Some("ringbearer"));
        assert_eq!(completed_by, None);

        // The owner may complete as well, recorded under their own name.
        store
            .complete_marker(&op, &owner, &marker, &notifier)
            .await
            .unwrap();
        let (state, _, completed_by) = marker_state(&store, &op, &owner).await;
        assert_eq!(state, MarkerState::Completed);
        assert_eq!(completed_by.as_deref(), Some("deviousness"));
    }

    #[tokio::test]
    async fn reject_returns_marker_to_pending() {
        let owner = agent("deviousness");
        let assignee = agent("ringbearer");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let marker = "m1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        store
            .assign_marker(&op, &owner, &marker, Some(&assignee), &notifier)
            .await
            .unwrap();
        store
            .reject_marker(&op, &assignee, &marker, &notifier)
            .await
            .unwrap();

        let doc = store.populate(&op, &owner).await.unwrap();
        assert_eq!(doc.markers[0].state, MarkerState::Pending);
        assert!(doc.markers[0].assigned_to.is_none());

        // Nothing left to reject.
        assert!(matches!(
            store.reject_marker(&op, &assignee, &marker, &notifier).await,
            Err(OpError::NotAssigned)
        ));
    }

    #[tokio::test]
    async fn pending_marker_cannot_be_completed() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        let result = store
            .complete_marker(&op, &owner, &"m1".parse().unwrap(), &notifier)
            .await;
        assert!(matches!(result, Err(OpError::NotAssigned)));
    }

    #[tokio::test]
    async fn completion_gated_on_read_access() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        let result = store
            .complete_marker(&op, &agent("stranger"), &"m1".parse().unwrap(), &notifier)
            .await;
        assert!(matches!(result, Err(OpError::PermissionDenied)));
    }

    #[tokio::test]
    async fn clearing_assignment_resets_state() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let marker = "m1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        store
            .assign_marker(&op, &owner, &marker, Some(&agent("ringbearer")), &notifier)
            .await
            .unwrap();
        store
            .assign_marker(&op, &owner, &marker, None, &notifier)
            .await
            .unwrap();

        let doc = store.populate(&op, &owner).await.unwrap();
        assert_eq!(doc.markers[0].state, MarkerState::Pending);
        assert!(doc.markers[0].assigned_to.is_none());
    }
}
