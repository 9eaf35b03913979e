// SPDX-License-Identifier: MIT OR Apache-2.0

//! Team membership and per-operation team grants.
//!
//! Membership rows answer the access resolver's visibility questions. The "on" state models an
//! agent who shares location with the team; only "on" members see operations scoped to the team.
use fieldplan_core::{AgentId, OperationId, TeamGrant, TeamId, TeamRole};
use sqlx::{query, query_as};

use crate::access::AccessResolver;
use crate::error::OpError;
use crate::sqlite::{SqliteError, SqliteStore, Transaction, decode};

/// Team membership and operation grant management.
pub trait TeamStore {
    /// Add an agent to a team. New members start in the "off" state.
    fn add_member(
        &self,
        team: &TeamId,
        agent: &AgentId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Remove an agent from a team.
    fn remove_member(
        &self,
        team: &TeamId,
        agent: &AgentId,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Toggle an agent's "on"/"off" state within a team.
    fn set_member_state(
        &self,
        team: &TeamId,
        agent: &AgentId,
        on: bool,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Whether the agent is a member of the team, regardless of state.
    fn agent_in_team(
        &self,
        team: &TeamId,
        agent: &AgentId,
    ) -> impl Future<Output = Result<bool, OpError>>;

    /// Grant a team a role on an operation. Restricted to the owner.
    fn add_grant(
        &self,
        op: &OperationId,
        agent: &AgentId,
        team: &TeamId,
        role: TeamRole,
    ) -> impl Future<Output = Result<(), OpError>>;

    /// Revoke a team's grant on an operation. Restricted to the owner.
    fn delete_grant(
        &self,
        op: &OperationId,
        agent: &AgentId,
        team: &TeamId,
        role: TeamRole,
    ) -> impl Future<Output = Result<(), OpError>>;
}

impl TeamStore for SqliteStore<'_> {
    async fn add_member(&self, team: &TeamId, agent: &AgentId) -> Result<(), OpError> {
        self.execute(async |pool| {
            query(
                "
                INSERT INTO team_members_v1 (team_id, agent_id, state)
                VALUES (?1, ?2, 'off')
                ON CONFLICT (team_id, agent_id) DO NOTHING
                ",
            )
            .bind(team.as_str())
            .bind(agent.as_str())
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn remove_member(&self, team: &TeamId, agent: &AgentId) -> Result<(), OpError> {
        self.execute(async |pool| {
            query("DELETE FROM team_members_v1 WHERE team_id = ?1 AND agent_id = ?2")
                .bind(team.as_str())
                .bind(agent.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn set_member_state(
        &self,
        team: &TeamId,
        agent: &AgentId,
        on: bool,
    ) -> Result<(), OpError> {
        let affected = self
            .execute(async |pool| {
                let result = query(
                    "UPDATE team_members_v1 SET state = ?1 WHERE team_id = ?2 AND agent_id = ?3",
                )
                .bind(if on { "on" } else { "off" })
                .bind(team.as_str())
                .bind(agent.as_str())
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

    async fn agent_in_team(&self, team: &TeamId, agent: &AgentId) -> Result<bool, OpError> {
        let count = self
            .execute(async |pool| {
                let row: (i64,) = query_as(
                    "SELECT COUNT(*) FROM team_members_v1 WHERE team_id = ?1 AND agent_id = ?2",
                )
                .bind(team.as_str())
                .bind(agent.as_str())
                .fetch_one(pool)
                .await?;
                Ok(row.0)
            })
            .await?;
        Ok(count > 0)
    }

    async fn add_grant(
        &self,
        op: &OperationId,
        agent: &AgentId,
        team: &TeamId,
        role: TeamRole,
    ) -> Result<(), OpError> {
        if !self.is_owner(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query(
                "
                INSERT INTO op_team_grants_v1 (op_id, team_id, role)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (op_id, team_id, role) DO NOTHING
                ",
            )
            .bind(op.as_str())
            .bind(team.as_str())
            .bind(role.as_str())
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete_grant(
        &self,
        op: &OperationId,
        agent: &AgentId,
        team: &TeamId,
        role: TeamRole,
    ) -> Result<(), OpError> {
        if !self.is_owner(op, agent).await {
            return Err(OpError::PermissionDenied);
        }

        self.execute(async |pool| {
            query("DELETE FROM op_team_grants_v1 WHERE op_id = ?1 AND team_id = ?2 AND role = ?3")
                .bind(op.as_str())
                .bind(team.as_str())
                .bind(role.as_str())
                .execute(pool)
                .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// All grants on an operation.
pub(crate) async fn list_grants(
    store: &SqliteStore<'_>,
    op: &OperationId,
) -> Result<Vec<TeamGrant>, SqliteError> {
    let rows = store
        .execute(async |pool| {
            let rows: Vec<(String, String)> = query_as(
                "SELECT team_id, role FROM op_team_grants_v1 WHERE op_id = ?1 ORDER BY team_id, role",
            )
            .bind(op.as_str())
            .fetch_all(pool)
            .await?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|(team_id, role)| {
            Ok(TeamGrant {
                team_id: decode("team", TeamId::new(team_id))?,
                role: decode("role", role.parse::<TeamRole>())?,
            })
        })
        .collect()
}

/// Record one grant from a freshly uploaded document, inside the sync transaction.
pub(crate) async fn insert_grant(
    tx: &mut Transaction<'_>,
    op: &OperationId,
    grant: &TeamGrant,
) -> Result<(), SqliteError> {
    query(
        "
        INSERT INTO op_team_grants_v1 (op_id, team_id, role)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (op_id, team_id, role) DO NOTHING
        ",
    )
    .bind(op.as_str())
    .bind(grant.team_id.as_str())
    .bind(grant.role.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use fieldplan_core::{OperationId, TeamGrant, TeamId, TeamRole};

    use crate::error::OpError;
    use crate::operations::OperationStore;
    use crate::sqlite::SqliteStore;
    use crate::sync::SyncEngine;
    use crate::test_utils::{agent, sample_document, seeded};

    use super::TeamStore;

    #[tokio::test]
    async fn membership_round_trip() {
        let store = SqliteStore::temporary().await;
        let team: TeamId = "team-1".parse().unwrap();
        let member = agent("ringbearer");

        assert!(!store.agent_in_team(&team, &member).await.unwrap());
        store.add_member(&team, &member).await.unwrap();
        // Adding twice is fine.
        store.add_member(&team, &member).await.unwrap();
        assert!(store.agent_in_team(&team, &member).await.unwrap());

        store.remove_member(&team, &member).await.unwrap();
        assert!(!store.agent_in_team(&team, &member).await.unwrap());

        // State changes on a non-member are reported.
        assert!(matches!(
            store.set_member_state(&team, &member, true).await,
            Err(OpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn grant_mutations_restricted_to_owner() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let team: TeamId = "team-2".parse().unwrap();

        assert!(matches!(
            store
                .add_grant(&op, &agent("stranger"), &team, TeamRole::Read)
                .await,
            Err(OpError::PermissionDenied)
        ));

        store
            .add_grant(&op, &owner, &team, TeamRole::AssignedOnly)
            .await
            .unwrap();
        let doc = store.populate(&op, &owner).await.unwrap();
        assert_eq!(doc.team_grants.len(), 1);
        assert_eq!(doc.team_grants[0].role, TeamRole::AssignedOnly);

        store
            .delete_grant(&op, &owner, &team, TeamRole::AssignedOnly)
            .await
            .unwrap();
        let doc = store.populate(&op, &owner).await.unwrap();
        assert!(doc.team_grants.is_empty());
    }

    #[tokio::test]
    async fn uploaded_grants_are_recorded_on_insert() {
        let owner = agent("deviousness");
        let store = SqliteStore::temporary().await;
        let mut doc = sample_document("op1");
        doc.team_grants.push(TeamGrant {
            team_id: "team-2".parse().unwrap(),
            role: TeamRole::Read,
        });
        store.insert(&doc, &owner).await.unwrap();

        let stored = store
            .populate(&"op1".parse().unwrap(), &owner)
            .await
            .unwrap();
        assert_eq!(stored.team_grants.len(), 1);
        assert_eq!(stored.team_grants[0].team_id.as_str(), "team-2");
    }
}
