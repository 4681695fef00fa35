//! PostgreSQL implementation of SessionStore.
//!
//! Schema lives in `migrations/`. Vote order is kept by a sequence column
//! that is bumped whenever a participant changes their vote.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{
    DomainError, ErrorCode, ParticipantId, SessionId, WorkItemId,
};
use crate::domain::session::{
    Estimate, Role, RosterChange, RosterEntry, SessionKind, SessionRecord, Vote, VoteRound,
    WorkItem, WorkItemStatus,
};
use crate::ports::SessionStore;

/// PostgreSQL implementation of SessionStore.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Clear the current round of an item, appending it to the item's
    /// history if it had been revealed.
    async fn close_round(
        tx: &mut Transaction<'_, Postgres>,
        work_item_id: &WorkItemId,
    ) -> Result<(), DomainError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM work_items WHERE id = $1 FOR UPDATE")
                .bind(work_item_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(storage("lock work item"))?;
        let Some(status) = status else {
            return Err(DomainError::not_found(format!("work item {}", work_item_id)));
        };

        if status == "voted" {
            let rows = sqlx::query(
                r#"
                SELECT participant_id, value FROM work_item_votes
                WHERE work_item_id = $1
                ORDER BY seq
                "#,
            )
            .bind(work_item_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
            .map_err(storage("fetch votes"))?;

            let votes = rows.iter().map(row_to_vote).collect::<Result<Vec<_>, _>>()?;
            if !votes.is_empty() {
                let round = serde_json::to_value(VoteRound { votes }).map_err(|e| {
                    DomainError::new(ErrorCode::Internal, format!("encode vote round: {}", e))
                })?;
                sqlx::query(
                    "UPDATE work_items SET history = history || jsonb_build_array($2::jsonb) WHERE id = $1",
                )
                .bind(work_item_id.as_uuid())
                .bind(round)
                .execute(&mut **tx)
                .await
                .map_err(storage("archive vote round"))?;
            }
        }

        sqlx::query("DELETE FROM work_item_votes WHERE work_item_id = $1")
            .bind(work_item_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(storage("clear votes"))?;
        Ok(())
    }

    async fn set_leader(&self, session_id: &SessionId, leader: &ParticipantId) -> Result<(), DomainError> {
        sqlx::query("UPDATE estimation_sessions SET leader_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(session_id.as_uuid())
            .bind(leader.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage("set leader"))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load_session(&self, id: &SessionId) -> Result<SessionRecord, DomainError> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, name, leader_id, auto_finish_voting, allowed_values,
                   active_work_item_id, votes_revealed
            FROM estimation_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("fetch session"))?
        .ok_or_else(|| DomainError::not_found(format!("session {}", id)))?;

        let mut record = row_to_record(&row)?;

        let roster = sqlx::query(
            r#"
            SELECT participant_id, display_name, role
            FROM session_participants
            WHERE session_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("fetch roster"))?;
        record.roster = roster
            .iter()
            .map(row_to_roster_entry)
            .collect::<Result<_, _>>()?;

        let items = sqlx::query(
            r#"
            SELECT id, title, description, position, status, points, history
            FROM work_items
            WHERE session_id = $1
            ORDER BY position
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("fetch work items"))?;

        let votes = sqlx::query(
            r#"
            SELECT v.work_item_id, v.participant_id, v.value
            FROM work_item_votes v
            JOIN work_items w ON w.id = v.work_item_id
            WHERE w.session_id = $1
            ORDER BY v.seq
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("fetch votes"))?;

        let mut item_votes: Vec<(Uuid, Vote)> = Vec::with_capacity(votes.len());
        for row in &votes {
            let item_id: Uuid = row.try_get("work_item_id").map_err(decode("work_item_id"))?;
            item_votes.push((item_id, row_to_vote(row)?));
        }

        record.work_items = items
            .iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(decode("id"))?;
                let votes = item_votes
                    .iter()
                    .filter(|(item_id, _)| *item_id == id)
                    .map(|(_, vote)| vote.clone())
                    .collect();
                row_to_work_item(row, votes)
            })
            .collect::<Result<_, _>>()?;

        Ok(record)
    }

    async fn record_vote(
        &self,
        _session_id: &SessionId,
        work_item_id: &WorkItemId,
        participant_id: &ParticipantId,
        value: &Estimate,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO work_item_votes (work_item_id, participant_id, value, cast_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (work_item_id, participant_id)
            DO UPDATE SET value = EXCLUDED.value, cast_at = NOW(), seq = DEFAULT
            "#,
        )
        .bind(work_item_id.as_uuid())
        .bind(participant_id.as_str())
        .bind(value.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage("record vote"))?;
        Ok(())
    }

    async fn retract_vote(
        &self,
        _session_id: &SessionId,
        work_item_id: &WorkItemId,
        participant_id: &ParticipantId,
    ) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM work_item_votes WHERE work_item_id = $1 AND participant_id = $2")
            .bind(work_item_id.as_uuid())
            .bind(participant_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage("retract vote"))?;
        Ok(())
    }

    async fn reveal_votes(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        sqlx::query("UPDATE work_items SET status = 'voted' WHERE id = $1")
            .bind(work_item_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(storage("reveal work item"))?;
        sqlx::query(
            "UPDATE estimation_sessions SET votes_revealed = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(session_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(storage("reveal session"))?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(())
    }

    async fn finalize_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        points: &Estimate,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        Self::close_round(&mut tx, work_item_id).await?;
        sqlx::query("UPDATE work_items SET status = 'finalized', points = $2 WHERE id = $1")
            .bind(work_item_id.as_uuid())
            .bind(points.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage("finalize work item"))?;
        sqlx::query(
            r#"
            UPDATE estimation_sessions
            SET active_work_item_id = NULL, votes_revealed = FALSE, updated_at = NOW()
            WHERE id = $1 AND active_work_item_id = $2
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(work_item_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(storage("clear active work item"))?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(())
    }

    async fn set_active_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: Option<&WorkItemId>,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;

        let previous: Option<Uuid> = sqlx::query_scalar(
            "SELECT active_work_item_id FROM estimation_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("lock session"))?
        .flatten();

        if let Some(previous) = previous.map(WorkItemId::from_uuid) {
            if Some(&previous) != work_item_id {
                Self::close_round(&mut tx, &previous).await?;
                sqlx::query(
                    "UPDATE work_items SET status = 'pending' WHERE id = $1 AND status IN ('active', 'voted')",
                )
                .bind(previous.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(storage("deactivate work item"))?;
            }
        }

        if let Some(id) = work_item_id {
            Self::close_round(&mut tx, id).await?;
            sqlx::query("UPDATE work_items SET status = 'active' WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(storage("activate work item"))?;
        }

        sqlx::query(
            r#"
            UPDATE estimation_sessions
            SET active_work_item_id = $2, votes_revealed = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(work_item_id.map(|id| *id.as_uuid()))
        .execute(&mut *tx)
        .await
        .map_err(storage("set active work item"))?;

        tx.commit().await.map_err(storage("commit"))?;
        Ok(())
    }

    async fn save_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        title: &str,
        description: Option<&str>,
        position: u32,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO work_items (id, session_id, title, description, position, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(work_item_id.as_uuid())
        .bind(session_id.as_uuid())
        .bind(title)
        .bind(description)
        .bind(position as i32)
        .execute(&self.pool)
        .await
        .map_err(storage("insert work item"))?;
        Ok(())
    }

    async fn save_roster_change(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        change: &RosterChange,
    ) -> Result<(), DomainError> {
        match change {
            RosterChange::Joined { display_name, role } => {
                sqlx::query(
                    r#"
                    INSERT INTO session_participants
                        (session_id, participant_id, display_name, role, joined_at, last_seen_at)
                    VALUES ($1, $2, $3, $4, NOW(), NOW())
                    ON CONFLICT (session_id, participant_id)
                    DO UPDATE SET display_name = EXCLUDED.display_name,
                                  role = EXCLUDED.role,
                                  last_seen_at = NOW()
                    "#,
                )
                .bind(session_id.as_uuid())
                .bind(participant_id.as_str())
                .bind(display_name)
                .bind(role.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage("save participant"))?;
                if *role == Role::Facilitator {
                    self.set_leader(session_id, participant_id).await?;
                }
            }
            RosterChange::Left => {
                sqlx::query(
                    "UPDATE session_participants SET last_seen_at = NOW() WHERE session_id = $1 AND participant_id = $2",
                )
                .bind(session_id.as_uuid())
                .bind(participant_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage("mark participant left"))?;
            }
            RosterChange::Expired => {
                sqlx::query(
                    "DELETE FROM session_participants WHERE session_id = $1 AND participant_id = $2",
                )
                .bind(session_id.as_uuid())
                .bind(participant_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage("remove participant"))?;
            }
            RosterChange::RoleChanged { role } => {
                sqlx::query(
                    "UPDATE session_participants SET role = $3 WHERE session_id = $1 AND participant_id = $2",
                )
                .bind(session_id.as_uuid())
                .bind(participant_id.as_str())
                .bind(role.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage("change role"))?;
                if *role == Role::Facilitator {
                    self.set_leader(session_id, participant_id).await?;
                }
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Row mapping
// ════════════════════════════════════════════════════════════════════════════

fn storage(context: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| DomainError::storage(format!("Failed to {}: {}", context, e))
}

fn decode(column: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| DomainError::storage(format!("Failed to decode {}: {}", column, e))
}

fn invalid_column(column: &str, value: &str) -> DomainError {
    DomainError::storage(format!("Invalid {} in database: {}", column, value))
}

fn row_to_record(row: &PgRow) -> Result<SessionRecord, DomainError> {
    let id: Uuid = row.try_get("id").map_err(decode("id"))?;
    let kind: String = row.try_get("kind").map_err(decode("kind"))?;
    let name: String = row.try_get("name").map_err(decode("name"))?;
    let leader: Option<String> = row.try_get("leader_id").map_err(decode("leader_id"))?;
    let auto_finish_voting: bool = row
        .try_get("auto_finish_voting")
        .map_err(decode("auto_finish_voting"))?;
    let allowed_values: Vec<String> = row
        .try_get("allowed_values")
        .map_err(decode("allowed_values"))?;
    let active: Option<Uuid> = row
        .try_get("active_work_item_id")
        .map_err(decode("active_work_item_id"))?;
    let revealed: bool = row.try_get("votes_revealed").map_err(decode("votes_revealed"))?;

    let kind = match kind.as_str() {
        "battle" => SessionKind::Battle,
        "storyboard" => SessionKind::Storyboard,
        other => return Err(invalid_column("kind", other)),
    };

    Ok(SessionRecord {
        id: SessionId::from_uuid(id),
        kind,
        name,
        leader: leader.map(ParticipantId::new).transpose()?,
        auto_finish_voting,
        allowed_values: allowed_values
            .into_iter()
            .map(Estimate::new)
            .collect::<Result<_, _>>()?,
        active_work_item: active.map(WorkItemId::from_uuid),
        revealed,
        roster: Vec::new(),
        work_items: Vec::new(),
    })
}

fn parse_role(value: &str) -> Result<Role, DomainError> {
    match value {
        "facilitator" => Ok(Role::Facilitator),
        "voter" => Ok(Role::Voter),
        "spectator" => Ok(Role::Spectator),
        other => Err(invalid_column("role", other)),
    }
}

fn parse_status(value: &str) -> Result<WorkItemStatus, DomainError> {
    match value {
        "pending" => Ok(WorkItemStatus::Pending),
        "active" => Ok(WorkItemStatus::Active),
        "voted" => Ok(WorkItemStatus::Voted),
        "finalized" => Ok(WorkItemStatus::Finalized),
        other => Err(invalid_column("status", other)),
    }
}

fn row_to_roster_entry(row: &PgRow) -> Result<RosterEntry, DomainError> {
    let participant_id: String = row
        .try_get("participant_id")
        .map_err(decode("participant_id"))?;
    let display_name: String = row.try_get("display_name").map_err(decode("display_name"))?;
    let role: String = row.try_get("role").map_err(decode("role"))?;

    Ok(RosterEntry {
        participant_id: ParticipantId::new(participant_id)?,
        display_name,
        role: parse_role(&role)?,
    })
}

fn row_to_vote(row: &PgRow) -> Result<Vote, DomainError> {
    let participant_id: String = row
        .try_get("participant_id")
        .map_err(decode("participant_id"))?;
    let value: String = row.try_get("value").map_err(decode("value"))?;
    Ok(Vote {
        participant_id: ParticipantId::new(participant_id)?,
        value: Estimate::new(value)?,
    })
}

fn row_to_work_item(row: &PgRow, votes: Vec<Vote>) -> Result<WorkItem, DomainError> {
    let id: Uuid = row.try_get("id").map_err(decode("id"))?;
    let title: String = row.try_get("title").map_err(decode("title"))?;
    let description: Option<String> = row.try_get("description").map_err(decode("description"))?;
    let position: i32 = row.try_get("position").map_err(decode("position"))?;
    let status: String = row.try_get("status").map_err(decode("status"))?;
    let points: Option<String> = row.try_get("points").map_err(decode("points"))?;
    let history: serde_json::Value = row.try_get("history").map_err(decode("history"))?;

    let history: Vec<VoteRound> = serde_json::from_value(history)
        .map_err(|e| DomainError::storage(format!("Invalid vote history: {}", e)))?;

    Ok(WorkItem::reconstitute(
        WorkItemId::from_uuid(id),
        title,
        description,
        position.max(0) as u32,
        parse_status(&status)?,
        points.map(Estimate::new).transpose()?,
        votes,
        history,
    ))
}
