use crate::db::DatabaseError;
use crate::models::{Message, MessagePage, MessageStatus};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        message: &Message,
    ) -> Result<Message, DatabaseError> {
        let record = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, chat_room_id, seq, sender_id, content, status, read_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, chat_room_id, seq, sender_id, content, status, read_at, created_at, updated_at
            "#,
        )
        .bind(message.id)
        .bind(message.chat_room_id)
        .bind(message.seq)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.status)
        .bind(message.read_at)
        .bind(message.created_at)
        .bind(message.updated_at)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        let record = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, chat_room_id, seq, sender_id, content, status, read_at, created_at, updated_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn room_of(&self, id: Uuid) -> Result<Option<Uuid>, DatabaseError> {
        let record: Option<(Uuid,)> =
            sqlx::query_as("SELECT chat_room_id FROM messages WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record.map(|r| r.0))
    }

    pub async fn lock(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Message>, DatabaseError> {
        let record = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, chat_room_id, seq, sender_id, content, status, read_at, created_at, updated_at
            FROM messages
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(record)
    }

    pub async fn list(
        &self,
        room_id: Uuid,
        page: MessagePage,
    ) -> Result<Vec<Message>, DatabaseError> {
        let records = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, chat_room_id, seq, sender_id, content, status, read_at, created_at, updated_at
            FROM messages
            WHERE chat_room_id = $1
              AND ($2::BIGINT IS NULL OR seq > $2)
            ORDER BY seq ASC
            OFFSET $3
            LIMIT $4
            "#,
        )
        .bind(room_id)
        .bind(page.after_seq)
        .bind(i64::from(page.offset))
        .bind(i64::from(page.limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn set_status(
        &self,
        conn: &mut PgConnection,
        message: &Message,
    ) -> Result<Message, DatabaseError> {
        let record = sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages
            SET status = $2, read_at = $3, updated_at = $4
            WHERE id = $1
            RETURNING id, chat_room_id, seq, sender_id, content, status, read_at, created_at, updated_at
            "#,
        )
        .bind(message.id)
        .bind(message.status)
        .bind(message.read_at)
        .bind(message.updated_at)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Marks every message in the room not sent by `reader` and not yet read.
    pub async fn mark_all_read(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $3, read_at = $4, updated_at = $4
            WHERE chat_room_id = $1 AND sender_id <> $2 AND status <> $3
            "#,
        )
        .bind(room_id)
        .bind(reader_id)
        .bind(MessageStatus::Read)
        .bind(at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Ground truth for a participant's unread counter.
    pub async fn count_unread_for(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        user_id: &str,
    ) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM messages
            WHERE chat_room_id = $1 AND sender_id <> $2 AND status <> $3
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(MessageStatus::Read)
        .fetch_one(conn)
        .await?;

        Ok(count.0)
    }
}
