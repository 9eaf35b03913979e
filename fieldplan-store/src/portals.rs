// SPDX-License-Identifier: MIT OR Apache-2.0

//! Portal rows: the geographic points every link and marker hangs off.
//!
//! Portals have no standalone creation API. They come into existence only through document
//! convergence and leave the same way; the setters here only annotate existing rows.
use fieldplan_core::{AgentId, OperationId, PortalDoc, PortalId};
use sqlx::{query, query_as};
use tracing::debug;

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::operations::OperationStore;
use crate::sqlite::{SqliteError, SqliteStore, Transaction, decode};

/// Per-portal annotations and lookups.
pub trait PortalStore {
    /// Update the free-text comment on a portal. Requires write access.
    fn set_portal_comment(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
        comment: Option<&str>,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Update the hardness classification on a portal. Requires write access.
    fn set_portal_hardness(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
        hardness: Option<&str>,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Fetch a single portal. Requires read access.
    fn portal_details(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
    ) -> impl Future<Output = Result<PortalDoc, OpError>>;
}

impl PortalStore for SqliteStore<'_> {
    async fn set_portal_comment(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
        comment: Option<&str>,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        annotate(self, op, portal, "comment", comment).await?;
        self.touch(op).await
    }

    async fn set_portal_hardness(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
        hardness: Option<&str>,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        annotate(self, op, portal, "hardness", hardness).await?;
        self.touch(op).await
    }

    async fn portal_details(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
    ) -> Result<PortalDoc, OpError> {
        if !self.read_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let row = self
            .execute(async |pool| {
                let row: Option<(String, String, String, Option<String>, Option<String>)> =
                    query_as(
                        "
                        SELECT name, lat, lon, comment, hardness
                        FROM portals_v1
                        WHERE op_id = ?1 AND id = ?2
                        ",
                    )
                    .bind(op.as_str())
                    .bind(portal.as_str())
                    .fetch_optional(pool)
                    .await?;
                Ok(row)
            })
            .await?;

        let Some((name, lat, lon, comment, hardness)) = row else {
            return Err(OpError::NotFound);
        };

        Ok(PortalDoc {
            id: portal.clone(),
            name,
            lat,
            lon,
            comment,
            hardness,
        })
    }
}

async fn annotate(
    store: &SqliteStore<'_>,
    op: &OperationId,
    portal: &PortalId,
    column: &'static str,
    value: Option<&str>,
) -> Result<(), OpError> {
    let affected = store
        .execute(async |pool| {
            let sql = format!("UPDATE portals_v1 SET {column} = ?1 WHERE op_id = ?2 AND id = ?3");
            let result = query(&sql)
                .bind(value)
                .bind(op.as_str())
                .bind(portal.as_str())
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

    // Annotating an unknown portal is not an error, matching the forgiving per-item contract.
    if affected == 0 {
        debug!(%op, %portal, column, "portal annotation matched no row");
    }
    Ok(())
}

/// All portals of an operation, ordered by name for stable output.
pub(crate) async fn list_portals(
    store: &SqliteStore<'_>,
    op: &OperationId,
) -> Result<Vec<PortalDoc>, SqliteError> {
    let rows = store
        .execute(async |pool| {
            let rows: Vec<(String, String, String, String, Option<String>, Option<String>)> =
                query_as(
                    "
                    SELECT id, name, lat, lon, comment, hardness
                    FROM portals_v1
                    WHERE op_id = ?1
                    ORDER BY name, id
                    ",
                )
                .bind(op.as_str())
                .fetch_all(pool)
                .await?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|(id, name, lat, lon, comment, hardness)| {
            Ok(PortalDoc {
                id: decode("portal", PortalId::new(id))?,
                name,
                lat,
                lon,
                comment,
                hardness,
            })
        })
        .collect()
}

/// Ids of all portals currently persisted for an operation, read inside the sync transaction.
pub(crate) async fn stored_ids(
    tx: &mut Transaction<'_>,
    op: &OperationId,
) -> Result<Vec<String>, SqliteError> {
    let rows: Vec<(String,)> = query_as("SELECT id FROM portals_v1 WHERE op_id = ?1")
        .bind(op.as_str())
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert or update one portal from a document.
pub(crate) async fn upsert(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    portal: &PortalDoc,
) -> Result<(), SqliteError> {
    query(
        "
        INSERT INTO
            portals_v1 (op_id, id, name, lat, lon, comment, hardness)
        VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (op_id, id) DO UPDATE
            SET name = ?3, lat = ?4, lon = ?5, comment = ?6, hardness = ?7
        ",
    )
    .bind(op.as_str())
    .bind(portal.id.as_str())
    .bind(&portal.name)
    .bind(&portal.lat)
    .bind(&portal.lon)
    .bind(portal.comment.as_deref())
    .bind(portal.hardness.as_deref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Delete one portal; links, markers, anchors and keys on it cascade.
pub(crate) async fn delete(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    portal: &str,
) -> Result<(), SqliteError> {
    query("DELETE FROM portals_v1 WHERE op_id = ?1 AND id = ?2")
        .bind(op.as_str())
        .bind(portal)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
