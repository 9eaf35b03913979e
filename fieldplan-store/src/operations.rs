// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operation root rows: change-version stamping, ownership transfer and read-side assembly of
//! the full document aggregate.
use std::time::{SystemTime, UNIX_EPOCH};

use fieldplan_core::{AgentId, OperationDocument, OperationId, TeamId};
use sqlx::{query, query_as};

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::sqlite::{SqliteError, SqliteStore, Transaction, decode};
use crate::{anchors, keys, links, markers, portals, teams};

/// Current time in unix milliseconds, the unit of the change-version stamp.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Lightweight root-row view of an operation, without any child collections.
#[derive(Clone, Debug)]
pub struct OperationStat {
    pub id: OperationId,
    pub name: String,
    pub owner: AgentId,
    pub color: String,
    pub team_id: Option<TeamId>,
    pub comment: Option<String>,
    pub modified: i64,
}

/// Root-row persistence and the read-side aggregate.
pub trait OperationStore {
    /// Fetch the root row, or `None` when the operation does not exist.
    fn stat(
        &self,
        op: &OperationId,
    ) -> impl Future<Output = Result<Option<OperationStat>, OpError>>;

    /// Current change-version stamp of an operation.
    fn modified(&self, op: &OperationId) -> impl Future<Output = Result<i64, OpError>>;

    /// Restamp the operation's change-version.
    ///
    /// The stamp is strictly monotonic per operation even within one millisecond, so a client
    /// comparing stamps can always distinguish "changed" from "unchanged".
    fn touch(&self, op: &OperationId) -> impl Future<Output = Result<(), OpError>>;

    /// Update the free-text comment. Requires write access.
    fn set_comment(
        &self,
        op: &OperationId,
        agent: &AgentId,
        comment: Option<&str>,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Transfer ownership to another agent. Restricted to the current owner.
    fn chown(
        &self,
        op: &OperationId,
        agent: &AgentId,
        to: &AgentId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Change the primary team scoping visibility. Restricted to the owner.
    fn set_team(
        &self,
        op: &OperationId,
        agent: &AgentId,
        team: Option<&TeamId>,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Delete the operation. Restricted to the owner; cascades to all child collections and
    /// team grants.
    fn delete(
        &self,
        op: &OperationId,
        agent: &AgentId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Assemble the full operation document from all entity stores. Requires read access.
    fn populate(
        &self,
        op: &OperationId,
        agent: &AgentId,
    ) -> impl Future<Output = Result<OperationDocument, OpError>>;

    /// Conditional fetch: assemble the document only if it was modified after `since`.
    ///
    /// Returns `None` when the stored stamp is not newer, the "not modified" case of the
    /// conditional-fetch contract.
    fn populate_if_newer(
        &self,
        op: &OperationId,
        agent: &AgentId,
        since: i64,
    ) -> impl Future<Output = Result<Option<OperationDocument>, OpError>>;
}

impl OperationStore for SqliteStore<'_> {
    async fn stat(&self, op: &OperationId) -> Result<Option<OperationStat>, OpError> {
        let row = self
            .execute(async |pool| {
                let row: Option<(String, String, String, Option<String>, Option<String>, i64)> =
                    query_as(
                        "
                        SELECT name, owner, color, team_id, comment, modified
                        FROM operations_v1
                        WHERE id = ?1
                        ",
                    )
                    .bind(op.as_str())
                    .fetch_optional(pool)
                    .await?;
                Ok(row)
            })
            .await?;

        let Some((name, owner, color, team_id, comment, modified)) = row else {
            return Ok(None);
        };

        Ok(Some(OperationStat {
            id: op.clone(),
            name,
            owner: decode("owner", AgentId::new(owner))?,
            color,
            team_id: decode("team", team_id.map(TeamId::new).transpose())?,
            comment,
            modified,
        }))
    }

    async fn modified(&self, op: &OperationId) -> Result<i64, OpError> {
        match self.stat(op).await? {
            Some(stat) => Ok(stat.modified),
            None => Err(OpError::NotFound),
        }
    }

    async fn touch(&self, op: &OperationId) -> Result<(), OpError> {
        let affected = self
            .execute(async |pool| {
                let result = query(TOUCH_SQL)
                    .bind(now_ms())
                    .bind(op.as_str())
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if affected == 0 {
            return Err(OpError::NotFound);
        }
        Ok(())
    }

    async fn set_comment(
        &self,
        op: &OperationId,
        agent: &AgentId,
        comment: Option<&str>,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("UPDATE operations_v1 SET comment = ?1 WHERE id = ?2")
                .bind(comment)
                .bind(op.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;

        self.touch(op).await
    }

    async fn chown(&self, op: &OperationId, agent: &AgentId, to: &AgentId) -> Result<(), OpError> {
        if !self.is_owner(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("UPDATE operations_v1 SET owner = ?1 WHERE id = ?2")
                .bind(to.as_str())
                .bind(op.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn set_team(
        &self,
        op: &OperationId,
        agent: &AgentId,
        team: Option<&TeamId>,
    ) -> Result<(), OpError> {
        if !self.is_owner(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("UPDATE operations_v1 SET team_id = ?1 WHERE id = ?2")
                .bind(team.map(TeamId::as_str))
                .bind(op.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, op: &OperationId, agent: &AgentId) -> Result<(), OpError> {
        if !self.is_owner(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let affected = self
            .execute(async |pool| {
                let result = query("DELETE FROM operations_v1 WHERE id = ?1")
                    .bind(op.as_str())
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if affected == 0 {
            return Err(OpError::NotFound);
        }
        Ok(())
    }

    async fn populate(
        &self,
        op: &OperationId,
        agent: &AgentId,
    ) -> Result<OperationDocument, OpError> {
        let Some(stat) = self.stat(op).await? else {
            return Err(OpError::NotFound);
        };
        if !self.read_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        Ok(OperationDocument {
            id: stat.id,
            name: stat.name,
            owner: Some(stat.owner),
            color: stat.color,
            team_id: stat.team_id,
            comment: stat.comment,
            modified: stat.modified,
            portals: portals::list_portals(self, op).await?,
            links: links::list_links(self, op).await?,
            markers: markers::list_markers(self, op).await?,
            anchors: anchors::list_anchors(self, op).await?,
            team_grants: teams::list_grants(self, op).await?,
            keys_on_hand: keys::list_on_hand(self, op).await?,
        })
    }

    async fn populate_if_newer(
        &self,
        op: &OperationId,
        agent: &AgentId,
        since: i64,
    ) -> Result<Option<OperationDocument>, OpError> {
        let modified = self.modified(op).await?;
        if !self.read_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }
        if modified <= since {
            return Ok(None);
        }
        Ok(Some(self.populate(op, agent).await?))
    }
}

// MAX keeps the stamp strictly increasing even when two mutations land within the same
// millisecond.
const TOUCH_SQL: &str = "UPDATE operations_v1 SET modified = MAX(?1, modified + 1) WHERE id = ?2";

/// Insert the root row. Used by the synchronization engine inside its transaction.
pub(crate) async fn insert_root_row(
    tx: &mut Transaction<'_>,
    doc: &OperationDocument,
    owner: &AgentId,
    modified: i64,
) -> Result<(), SqliteError> {
    query(
        "
        INSERT INTO
            operations_v1 (id, name, owner, color, team_id, comment, modified)
        VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
    )
    .bind(doc.id.as_str())
    .bind(&doc.name)
    .bind(owner.as_str())
    .bind(&doc.color)
    .bind(doc.team_id.as_ref().map(TeamId::as_str))
    .bind(doc.comment.as_deref())
    .bind(modified)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Update the root attributes from a document, leaving the owner untouched. Used by the
/// synchronization engine inside its transaction.
pub(crate) async fn update_root_row(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    doc: &OperationDocument,
) -> Result<(), SqliteError> {
    query(
        "
        UPDATE operations_v1
        SET name = ?1, color = ?2, team_id = ?3, comment = ?4
        WHERE id = ?5
        ",
    )
    .bind(&doc.name)
    .bind(&doc.color)
    .bind(doc.team_id.as_ref().map(TeamId::as_str))
    .bind(doc.comment.as_deref())
    .bind(op.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Restamp the change-version from within an open transaction.
pub(crate) async fn touch_in_tx(
    tx: &mut Transaction<'_>,
    op: &OperationId,
) -> Result<(), SqliteError> {
    query(TOUCH_SQL)
        .bind(now_ms())
        .bind(op.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}
