// SPDX-License-Identifier: MIT OR Apache-2.0

//! Link rows and the link workflow.
//!
//! Assignment and completion are deliberately two independent flags rather than one state
//! machine: an unassigned link can be marked complete by anyone with write access, and clearing
//! an assignment says nothing about whether the throw already happened.
use fieldplan_core::{AgentId, LinkDoc, LinkId, OperationId, PortalId};
use sqlx::{query, query_as};

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::notify::{Notifier, dispatch};
use crate::operations::OperationStore;
use crate::sqlite::{SqliteError, SqliteStore, Transaction, decode};

/// Per-link actions invoked directly by fine-grained API operations.
pub trait LinkStore {
    /// Set or clear the agent responsible for a link. Requires write access.
    ///
    /// A new assignee is notified; clearing an assignment notifies nobody.
    fn assign_link<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        assignee: Option<&AgentId>,
        notifier: &N,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Mark a link complete or incomplete.
    ///
    /// Permitted to write-access holders and to the agent currently assigned to this specific
    /// link: the one place a non-owner may mutate operation state.
    fn set_link_completed(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        completed: bool,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Update the color tag. Requires write access.
    fn set_link_color(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        color: &str,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Update the description. Requires write access.
    fn set_link_description(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        description: Option<&str>,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Reverse the direction of a link. Requires write access.
    fn swap_link(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// The agent currently assigned to a link, if any.
    fn link_assigned_to(
        &self,
        op: &OperationId,
        link: &LinkId,
    ) -> impl Future<Output = Result<Option<AgentId>, OpError>>;
}

impl LinkStore for SqliteStore<'_> {
    async fn assign_link<N: Notifier>(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        assignee: Option<&AgentId>,
        notifier: &N,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let affected = self
            .execute(async |pool| {
                let result =
                    query("UPDATE links_v1 SET assigned_to = ?1 WHERE op_id = ?2 AND id = ?3")
                        .bind(assignee.map(AgentId::as_str))
                        .bind(op.as_str())
                        .bind(link.as_str())
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
                "link_assigned",
                &format!("assigned link {link} in operation {op}"),
            )
            .await;
        }

        self.touch(op).await
    }

    async fn set_link_completed(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        completed: bool,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            let assigned = self.link_assigned_to(op, link).await?;
            if assigned.as_ref() != Some(agent) {
                return Err(OpError::PermissionDenied);
            }
        }

        let affected = self
            .execute(async |pool| {
                let result =
                    query("UPDATE links_v1 SET completed = ?1 WHERE op_id = ?2 AND id = ?3")
                        .bind(completed)
                        .bind(op.as_str())
                        .bind(link.as_str())
                        .execute(pool)
                        .await?;
                Ok(result.rows_affected())
            })
            .await?;
        if affected == 0 {
            return Err(OpError::NotFound);
        }

        self.touch(op).await
    }

    async fn set_link_color(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        color: &str,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("UPDATE links_v1 SET color = ?1 WHERE op_id = ?2 AND id = ?3")
                .bind(color)
                .bind(op.as_str())
                .bind(link.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;

        self.touch(op).await
    }

    async fn set_link_description(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
        description: Option<&str>,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("UPDATE links_v1 SET description = ?1 WHERE op_id = ?2 AND id = ?3")
                .bind(description)
                .bind(op.as_str())
                .bind(link.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;

        self.touch(op).await
    }

    async fn swap_link(
        &self,
        op: &OperationId,
        agent: &AgentId,
        link: &LinkId,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let affected = self
            .execute(async |pool| {
                // SQLite evaluates the right-hand sides against the old row, so this swaps.
                let result = query(
                    "
                    UPDATE links_v1
                    SET from_portal = to_portal, to_portal = from_portal
                    WHERE op_id = ?1 AND id = ?2
                    ",
                )
                .bind(op.as_str())
                .bind(link.as_str())
                .execute(pool)
                .await?;
                Ok(result.rows_affected())
            })
            .await?;
        if affected == 0 {
            return Err(OpError::NotFound);
        }

        self.touch(op).await
    }

    async fn link_assigned_to(
        &self,
        op: &OperationId,
        link: &LinkId,
    ) -> Result<Option<AgentId>, OpError> {
        let row = self
            .execute(async |pool| {
                let row: Option<(Option<String>,)> =
                    query_as("SELECT assigned_to FROM links_v1 WHERE op_id = ?1 AND id = ?2")
                        .bind(op.as_str())
                        .bind(link.as_str())
                        .fetch_optional(pool)
                        .await?;
                Ok(row)
            })
            .await?;

        let Some((assigned,)) = row else {
            return Err(OpError::NotFound);
        };
        Ok(decode("agent", assigned.map(AgentId::new).transpose())?)
    }
}

/// All links of an operation in throw order.
pub(crate) async fn list_links(
    store: &SqliteStore<'_>,
    op: &OperationId,
) -> Result<Vec<LinkDoc>, SqliteError> {
    type LinkRow = (
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        f64,
        bool,
        String,
    );

    let rows = store
        .execute(async |pool| {
            let rows: Vec<LinkRow> = query_as(
                "
                SELECT id, from_portal, to_portal, description, assigned_to, throw_order,
                       completed, color
                FROM links_v1
                WHERE op_id = ?1
                ORDER BY throw_order, id
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
            |(id, from, to, description, assigned_to, throw_order, completed, color)| {
                Ok(LinkDoc {
                    id: decode("link", LinkId::new(id))?,
                    from: decode("portal", PortalId::new(from))?,
                    to: decode("portal", PortalId::new(to))?,
                    description,
                    assigned_to: decode("agent", assigned_to.map(AgentId::new).transpose())?,
                    throw_order,
                    completed,
                    color,
                })
            },
        )
        .collect()
}

/// Ids of all links currently persisted for an operation, read inside the sync transaction.
pub(crate) async fn stored_ids(
    tx: &mut Transaction<'_>,
    op: &OperationId,
) -> Result<Vec<String>, SqliteError> {
    let rows: Vec<(String,)> = query_as("SELECT id FROM links_v1 WHERE op_id = ?1")
        .bind(op.as_str())
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert or update one link from a document.
pub(crate) async fn upsert(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    link: &LinkDoc,
) -> Result<(), SqliteError> {
    query(
        "
        INSERT INTO
            links_v1 (op_id, id, from_portal, to_portal, description, assigned_to,
                      throw_order, completed, color)
        VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (op_id, id) DO UPDATE
            SET from_portal = ?3, to_portal = ?4, description = ?5, assigned_to = ?6,
                throw_order = ?7, completed = ?8, color = ?9
        ",
    )
    .bind(op.as_str())
    .bind(link.id.as_str())
    .bind(link.from.as_str())
    .bind(link.to.as_str())
    .bind(link.description.as_deref())
    .bind(link.assigned_to.as_ref().map(AgentId::as_str))
    .bind(link.throw_order)
    .bind(link.completed)
    .bind(&link.color)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Delete one link.
pub(crate) async fn delete(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    link: &str,
) -> Result<(), SqliteError> {
    query("DELETE FROM links_v1 WHERE op_id = ?1 AND id = ?2")
        .bind(op.as_str())
        .bind(link)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use fieldplan_core::OperationId;

    use crate::error::OpError;
    use crate::notify::test_utils::RecordingNotifier;
    use crate::operations::OperationStore;
    use crate::sqlite::SqliteStore;
    use crate::sync::SyncEngine;
    use crate::test_utils::{agent, link, sample_document, seeded};

    use super::LinkStore;

    #[tokio::test]
    async fn assignment_notifies_the_assignee() {
        let owner = agent("deviousness");
        let assignee = agent("ringbearer");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let link = "l1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        store
            .assign_link(&op, &owner, &link, Some(&assignee), &notifier)
            .await
            .unwrap();
        let events = notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, assignee);
        assert_eq!(events[0].1, "link_assigned");

        // Clearing the assignment stays silent.
        store
            .assign_link(&op, &owner, &link, None, &notifier)
            .await
            .unwrap();
        assert_eq!(notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn assignee_may_toggle_completion_of_their_link_only() {
        let owner = agent("deviousness");
        let assignee = agent("ringbearer");
        let store = SqliteStore::temporary().await;
        let mut doc = sample_document("op1");
        doc.links.push(link("l2", "p2", "p1", 2.0));
        store.insert(&doc, &owner).await.unwrap();

        let op: OperationId = "op1".parse().unwrap();
        let link = "l1".parse().unwrap();
        let notifier = RecordingNotifier::new();
        store
            .assign_link(&op, &owner, &link, Some(&assignee), &notifier)
            .await
            .unwrap();

        // The assignee holds no write access but may complete their own link.
        store
            .set_link_completed(&op, &assignee, &link, true)
            .await
            .unwrap();
        let stored = store.populate(&op, &owner).await.unwrap();
        assert!(stored.links.iter().any(|l| l.id.as_str() == "l1" && l.completed));

        // The escalation is scoped to that link alone.
        assert!(matches!(
            store
                .set_link_completed(&op, &assignee, &"l2".parse().unwrap(), true)
                .await,
            Err(OpError::PermissionDenied)
        ));

        // Anyone else without write access is rejected outright.
        assert!(matches!(
            store
                .set_link_completed(&op, &agent("stranger"), &link, false)
                .await,
            Err(OpError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn swap_reverses_direction() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let link = "l1".parse().unwrap();

        store.swap_link(&op, &owner, &link).await.unwrap();
        let doc = store.populate(&op, &owner).await.unwrap();
        assert_eq!(doc.links[0].from.as_str(), "p2");
        assert_eq!(doc.links[0].to.as_str(), "p1");
    }

    #[tokio::test]
    async fn unknown_link_is_not_found() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let notifier = RecordingNotifier::new();

        let result = store
            .assign_link(&op, &owner, &"l9".parse().unwrap(), None, &notifier)
            .await;
        assert!(matches!(result, Err(OpError::NotFound)));
        assert!(matches!(
            store.link_assigned_to(&op, &"l9".parse().unwrap()).await,
            Err(OpError::NotFound)
        ));
    }
}
