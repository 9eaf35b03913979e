// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-agent key counts on portals.
//!
//! Key rows are owned by the reporting agent, not by the plan, so the document synchronization
//! engine never reconciles them. They only ride along in the populated aggregate.
use fieldplan_core::{AgentId, KeyOnHand, OperationId, PortalId};
use sqlx::error::ErrorKind;
use sqlx::{query, query_as};
use tracing::debug;

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::sqlite::{SqliteError, SqliteStore, decode};

/// Key inventory reporting.
pub trait KeyStore {
    /// Record how many keys for a portal the acting agent holds. Requires read access.
    ///
    /// Reporting against a portal the operation does not contain is silently ignored: clients
    /// routinely report keys against a stale portal list.
    fn set_on_hand(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
        on_hand: i64,
        capsule: Option<&str>,
    ) -> impl Future<Output = Result<(), OpError>>;
}

impl KeyStore for SqliteStore<'_> {
    async fn set_on_hand(
        &self,
        op: &OperationId,
        agent: &AgentId,
        portal: &PortalId,
        on_hand: i64,
        capsule: Option<&str>,
    ) -> Result<(), OpError> {
        if !self.read_access(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        let result = self
            .execute(async |pool| {
                query(
                    "
                    INSERT INTO op_keys_v1 (op_id, portal_id, agent_id, on_hand, capsule)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (op_id, portal_id, agent_id) DO UPDATE
                        SET on_hand = ?4, capsule = ?5
                    ",
                )
                .bind(op.as_str())
                .bind(portal.as_str())
                .bind(agent.as_str())
                .bind(on_hand)
                .bind(capsule)
                .execute(pool)
                .await?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(SqliteError::Sqlite(sqlx::Error::Database(err)))
                if err.kind() == ErrorKind::ForeignKeyViolation =>
            {
                debug!(%op, %portal, %agent, "key count against unknown portal, ignoring");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// All key counts reported for an operation.
pub(crate) async fn list_on_hand(
    store: &SqliteStore<'_>,
    op: &OperationId,
) -> Result<Vec<KeyOnHand>, SqliteError> {
    let rows = store
        .execute(async |pool| {
            let rows: Vec<(String, String, i64, Option<String>)> = query_as(
                "
                SELECT portal_id, agent_id, on_hand, capsule
                FROM op_keys_v1
                WHERE op_id = ?1
                ORDER BY portal_id, agent_id
                ",
            )
            .bind(op.as_str())
            .fetch_all(pool)
            .await?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|(portal_id, agent_id, on_hand, capsule)| {
            Ok(KeyOnHand {
                portal_id: decode("portal", PortalId::new(portal_id))?,
                agent_id: decode("agent", AgentId::new(agent_id))?,
                on_hand,
                capsule,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use fieldplan_core::OperationId;

    use crate::error::OpError;
    use crate::operations::OperationStore;
    use crate::test_utils::{agent, seeded};

    use super::KeyStore;

    #[tokio::test]
    async fn counts_ride_along_in_the_aggregate() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let portal = "p1".parse().unwrap();

        store
            .set_on_hand(&op, &owner, &portal, 4, Some("capsule-9"))
            .await
            .unwrap();
        // Re-reporting overwrites, it does not accumulate.
        store
            .set_on_hand(&op, &owner, &portal, 6, Some("capsule-9"))
            .await
            .unwrap();

        let doc = store.populate(&op, &owner).await.unwrap();
        assert_eq!(doc.keys_on_hand.len(), 1);
        assert_eq!(doc.keys_on_hand[0].on_hand, 6);
        assert_eq!(doc.keys_on_hand[0].capsule.as_deref(), Some("capsule-9"));
    }

    #[tokio::test]
    async fn unknown_portal_is_silently_ignored() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();

        store
            .set_on_hand(&op, &owner, &"nowhere".parse().unwrap(), 2, None)
            .await
            .unwrap();

        let doc = store.populate(&op, &owner).await.unwrap();
        assert!(doc.keys_on_hand.is_empty());
    }

    #[tokio::test]
    async fn reporting_requires_read_access() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();

        let result = store
            .set_on_hand(&op, &agent("stranger"), &"p1".parse().unwrap(), 1, None)
            .await;
        assert!(matches!(result, Err(OpError::PermissionDenied)));
    }
}
