// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access control resolution for operations.
//!
//! Every mutating call into the engines consults this resolver once. The answers are pure reads
//! with a fail-closed policy: if the database cannot be queried the resolver denies access and
//! logs the failure, it never grants on error.
use fieldplan_core::{AgentId, OperationId};
use sqlx::query_as;
use tracing::warn;

use crate::sqlite::SqliteStore;

/// Read/write/ownership questions about an agent and an operation.
pub trait AccessResolver {
    /// The operation's stored owner equals the given agent.
    fn is_owner(&self, op: &OperationId, agent: &AgentId) -> impl Future<Output = bool>;

    /// Agent may submit document updates and per-item edits.
    ///
    /// Currently equivalent to ownership: team grants with a "write" role are recorded but not
    /// consulted for write decisions.
    fn write_access(&self, op: &OperationId, agent: &AgentId) -> impl Future<Output = bool>;

    /// Agent may fetch the operation: the owner, an "on"-state member of the operation's primary
    /// team, or a member of any team holding a grant on the operation.
    fn read_access(&self, op: &OperationId, agent: &AgentId) -> impl Future<Output = bool>;

    /// Agent's visibility comes only through an "assignedonly" grant: they should be served the
    /// filtered view containing nothing but their own assignments.
    fn assigned_only_access(
        &self,
        op: &OperationId,
        agent: &AgentId,
    ) -> impl Future<Output = bool>;
}

impl AccessResolver for SqliteStore<'_> {
    async fn is_owner(&self, op: &OperationId, agent: &AgentId) -> bool {
        let result = self
            .execute(async |pool| {
                let row: (i64,) =
                    query_as("SELECT COUNT(*) FROM operations_v1 WHERE id = ?1 AND owner = ?2")
                        .bind(op.as_str())
                        .bind(agent.as_str())
                        .fetch_one(pool)
                        .await?;
                Ok(row.0)
            })
            .await;

        match result {
            Ok(count) => count > 0,
            Err(err) => {
                warn!(%op, %agent, %err, "ownership check failed, denying");
                false
            }
        }
    }

    async fn write_access(&self, op: &OperationId, agent: &AgentId) -> bool {
        self.is_owner(op, agent).await
    }

    async fn read_access(&self, op: &OperationId, agent: &AgentId) -> bool {
        if self.is_owner(op, agent).await {
            return true;
        }

        let result = self
            .execute(async |pool| {
                let row: (i64,) = query_as(
                    "
                    SELECT
                        (SELECT COUNT(*)
                         FROM operations_v1 o
                         JOIN team_members_v1 tm ON o.team_id = tm.team_id
                         WHERE o.id = ?1 AND tm.agent_id = ?2 AND tm.state = 'on')
                      + (SELECT COUNT(*)
                         FROM op_team_grants_v1 g
                         JOIN team_members_v1 tm ON g.team_id = tm.team_id
                         WHERE g.op_id = ?1 AND tm.agent_id = ?2 AND tm.state = 'on')
                    ",
                )
                .bind(op.as_str())
                .bind(agent.as_str())
                .fetch_one(pool)
                .await?;
                Ok(row.0)
            })
            .await;

        match result {
            Ok(count) => count > 0,
            Err(err) => {
                warn!(%op, %agent, %err, "read access check failed, denying");
                false
            }
        }
    }

    async fn assigned_only_access(&self, op: &OperationId, agent: &AgentId) -> bool {
        // Owners and primary-team members hold full visibility; the filtered view only applies
        // to agents whose sole path to the operation is an "assignedonly" grant.
        if self.is_owner(op, agent).await {
            return false;
        }

        let result = self
            .execute(async |pool| {
                let row: (i64, i64) = query_as(
                    "
                    SELECT
                        (SELECT COUNT(*)
                         FROM operations_v1 o
                         JOIN team_members_v1 tm ON o.team_id = tm.team_id
                         WHERE o.id = ?1 AND tm.agent_id = ?2 AND tm.state = 'on')
                      + (SELECT COUNT(*)
                         FROM op_team_grants_v1 g
                         JOIN team_members_v1 tm ON g.team_id = tm.team_id
                         WHERE g.op_id = ?1 AND tm.agent_id = ?2 AND tm.state = 'on'
                           AND g.role != 'assignedonly'),
                        (SELECT COUNT(*)
                         FROM op_team_grants_v1 g
                         JOIN team_members_v1 tm ON g.team_id = tm.team_id
                         WHERE g.op_id = ?1 AND tm.agent_id = ?2 AND tm.state = 'on'
                           AND g.role = 'assignedonly')
                    ",
                )
                .bind(op.as_str())
                .bind(agent.as_str())
                .fetch_one(pool)
                .await?;
                Ok(row)
            })
            .await;

        match result {
            Ok((full, assigned_only)) => full == 0 && assigned_only > 0,
            Err(err) => {
                warn!(%op, %agent, %err, "assigned-only check failed, denying");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use fieldplan_core::{OperationId, TeamId, TeamRole};

    use crate::teams::TeamStore;
    use crate::test_utils::{agent, seeded};

    use super::AccessResolver;

    #[tokio::test]
    async fn owner_holds_every_level() {
        let owner = agent("deviousness");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();

        assert!(store.is_owner(&op, &owner).await);
        assert!(store.write_access(&op, &owner).await);
        assert!(store.read_access(&op, &owner).await);

        let stranger = agent("stranger");
        assert!(!store.is_owner(&op, &stranger).await);
        assert!(!store.write_access(&op, &stranger).await);
        assert!(!store.read_access(&op, &stranger).await);
    }

    #[tokio::test]
    async fn primary_team_visibility_follows_member_state() {
        let owner = agent("deviousness");
        let member = agent("ringbearer");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let team: TeamId = "team-1".parse().unwrap();

        store.add_member(&team, &member).await.unwrap();
        // Dormant members see nothing.
        assert!(!store.read_access(&op, &member).await);

        store.set_member_state(&team, &member, true).await.unwrap();
        assert!(store.read_access(&op, &member).await);
        // Visibility never implies write.
        assert!(!store.write_access(&op, &member).await);

        store.set_member_state(&team, &member, false).await.unwrap();
        assert!(!store.read_access(&op, &member).await);
    }

    #[tokio::test]
    async fn grants_extend_visibility_to_other_teams() {
        let owner = agent("deviousness");
        let member = agent("lurker");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let team: TeamId = "team-2".parse().unwrap();

        store.add_member(&team, &member).await.unwrap();
        store.set_member_state(&team, &member, true).await.unwrap();
        assert!(!store.read_access(&op, &member).await);

        store
            .add_grant(&op, &owner, &team, TeamRole::Read)
            .await
            .unwrap();
        assert!(store.read_access(&op, &member).await);

        store
            .delete_grant(&op, &owner, &team, TeamRole::Read)
            .await
            .unwrap();
        assert!(!store.read_access(&op, &member).await);
    }

    #[tokio::test]
    async fn assigned_only_is_the_sole_path() {
        let owner = agent("deviousness");
        let member = agent("ringbearer");
        let store = seeded("op1", &owner).await;
        let op: OperationId = "op1".parse().unwrap();
        let team: TeamId = "team-3".parse().unwrap();

        store.add_member(&team, &member).await.unwrap();
        store.set_member_state(&team, &member, true).await.unwrap();
        store
            .add_grant(&op, &owner, &team, TeamRole::AssignedOnly)
            .await
            .unwrap();

        assert!(store.read_access(&op, &member).await);
        assert!(store.assigned_only_access(&op, &member).await);
        assert!(!store.assigned_only_access(&op, &owner).await);

        // A full grant anywhere lifts the restriction.
        store
            .add_grant(&op, &owner, &team, TeamRole::Read)
            .await
            .unwrap();
        assert!(!store.assigned_only_access(&op, &member).await);
    }
}
