// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anchor rows: the subset of portals a plan treats as structural.
//!
//! Anchors are plain references into `portals_v1` with no state of their own, so this module
//! only exists for the synchronization engine and the read-side aggregate.
use fieldplan_core::{OperationId, PortalId};
use sqlx::{query, query_as};

use crate::sqlite::{SqliteError, SqliteStore, Transaction, decode};

/// All anchors of an operation.
pub(crate) async fn list_anchors(
    store: &SqliteStore<'_>,
    op: &OperationId,
) -> Result<Vec<PortalId>, SqliteError> {
    let rows = store
        .execute(async |pool| {
            let rows: Vec<(String,)> =
                query_as("SELECT portal_id FROM anchors_v1 WHERE op_id = ?1 ORDER BY portal_id")
                    .bind(op.as_str())
                    .fetch_all(pool)
                    .await?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|(portal,)| decode("portal", PortalId::new(portal)))
        .collect()
}

/// Portal ids currently marked as anchors, read inside the sync transaction.
pub(crate) async fn stored_ids(
    tx: &mut Transaction<'_>,
    op: &OperationId,
) -> Result<Vec<String>, SqliteError> {
    let rows: Vec<(String,)> = query_as("SELECT portal_id FROM anchors_v1 WHERE op_id = ?1")
        .bind(op.as_str())
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Mark one portal as an anchor.
pub(crate) async fn upsert(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    portal: &PortalId,
) -> Result<(), SqliteError> {
    query(
        "
        INSERT INTO anchors_v1 (op_id, portal_id)
        VALUES (?1, ?2)
        ON CONFLICT (op_id, portal_id) DO NOTHING
        ",
    )
    .bind(op.as_str())
    .bind(portal.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Unmark one portal.
pub(crate) async fn delete(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    portal: &str,
) -> Result<(), SqliteError> {
    query("DELETE FROM anchors_v1 WHERE op_id = ?1 AND portal_id = ?2")
        .bind(op.as_str())
        .bind(portal)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
