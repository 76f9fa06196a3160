use crate::db::DatabaseError;
use crate::models::{NotificationState, NotificationTask};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// The notification outbox. Rows are written in the same transaction as the
/// message they announce and removed once the task reaches a terminal state.
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        task: &NotificationTask,
    ) -> Result<NotificationTask, DatabaseError> {
        let record = sqlx::query_as::<_, NotificationTask>(
            r#"
            INSERT INTO notification_tasks
                (id, message_id, chat_room_id, recipient_id, sender_id, preview, state,
                 attempts, next_attempt_at, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id, message_id, chat_room_id, recipient_id, sender_id, preview, state,
                      attempts, next_attempt_at, last_error, created_at, updated_at
            "#,
        )
        .bind(task.id)
        .bind(task.message_id)
        .bind(task.chat_room_id)
        .bind(&task.recipient_id)
        .bind(&task.sender_id)
        .bind(&task.preview)
        .bind(task.state)
        .bind(task.attempts)
        .bind(task.next_attempt_at)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    pub async fn get_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationTask>, DatabaseError> {
        let records = sqlx::query_as::<_, NotificationTask>(
            r#"
            SELECT id, message_id, chat_room_id, recipient_id, sender_id, preview, state,
                   attempts, next_attempt_at, last_error, created_at, updated_at
            FROM notification_tasks
            WHERE state IN ('pending', 'in_flight', 'retrying') AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Conditional update, so of two concurrent claimers exactly one gets the
    /// row back. Expired `in_flight` leases are claimable again.
    pub async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<NotificationTask>, DatabaseError> {
        let record = sqlx::query_as::<_, NotificationTask>(
            r#"
            UPDATE notification_tasks
            SET state = 'in_flight', attempts = attempts + 1, next_attempt_at = $3,
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('pending', 'in_flight', 'retrying')
              AND next_attempt_at <= $2
            RETURNING id, message_id, chat_room_id, recipient_id, sender_id, preview, state,
                      attempts, next_attempt_at, last_error, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn record_attempt(
        &self,
        id: Uuid,
        state: NotificationState,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_tasks
            SET state = $2, next_attempt_at = $4, last_error = $5, updated_at = NOW()
            WHERE id = $1 AND state = 'in_flight' AND attempts = $3
            "#,
        )
        .bind(id)
        .bind(state)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM notification_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_for_room(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM notification_tasks WHERE chat_room_id = $1")
            .bind(room_id)
            .execute(conn)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_pending(&self) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notification_tasks")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}
