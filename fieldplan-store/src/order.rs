// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk ordering of links and markers.
//!
//! Clients submit the full id list in the order the plan should be executed. Positions are
//! assigned 1-based and consecutive, so resubmitting the same list is a no-op apart from the
//! change-version stamp.
use fieldplan_core::{AgentId, OperationId};
use sqlx::query;
use tracing::debug;

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::operations::OperationStore;
use crate::sqlite::SqliteStore;

/// The id lists clients submit carry a `"000"` placeholder between unordered groups. It is not
/// an entity id and is skipped without consuming a position.
const GROUP_SENTINEL: &str = "000";

/// Which ordered collection of an operation to renumber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collection {
    Links,
    Markers,
}

impl Collection {
    fn update_sql(&self) -> &'static str {
        match self {
            Collection::Links => {
                "UPDATE links_v1 SET throw_order = ?1 WHERE op_id = ?2 AND id = ?3"
            }
            Collection::Markers => {
                "UPDATE markers_v1 SET sort_order = ?1 WHERE op_id = ?2 AND id = ?3"
            }
        }
    }
}

/// Renumbering of a whole ordered collection in one call.
pub trait OrderingEngine {
    /// Assign consecutive 1-based positions to the listed ids. Requires write access.
    ///
    /// Ids not present in the operation are logged and skipped but still consume their
    /// position, so the submitted ordering of the remaining ids is preserved. Ids of the
    /// collection not listed keep their current position.
    fn reorder(
        &self,
        op: &OperationId,
        agent: &AgentId,
        ids: &[String],
        collection: Collection,
    ) -> impl Future<Output = Result<(), OpError>>;
}

impl OrderingEngine for SqliteStore<'_> {
    async fn reorder(
        &self,
        op: &OperationId,
        agent: &AgentId,
        ids: &[String],
        collection: Collection,
    ) -> Result<(), OpError> {
        if !self.write_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let mut pos: i64 = 1;
        for id in ids {
            if id == GROUP_SENTINEL {
                continue;
            }

            let affected = self
                .execute(async |pool| {
                    let result = query(collection.update_sql())
                        .bind(pos)
                        .bind(op.as_str())
                        .bind(id.as_str())
                        .execute(pool)
                        .await?;
                    Ok(result.rows_affected())
                })
                .await?;
            if affected == 0 {
                debug!(%op, id, ?collection, "reorder id matched no row");
            }

            pos += 1;
        }

        self.touch(op).await
    }
}
