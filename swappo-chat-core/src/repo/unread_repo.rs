use crate::db::DatabaseError;
use crate::models::UnreadCount;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub struct UnreadRepository {
    pool: PgPool,
}

impl UnreadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        user_ids: [&str; 2],
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO unread_counters (chat_room_id, user_id, unread_count)
            VALUES ($1, $2, 0), ($1, $3, 0)
            ON CONFLICT (chat_room_id, user_id) DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(user_ids[0])
        .bind(user_ids[1])
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn increment(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        user_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE unread_counters
            SET unread_count = unread_count + 1, updated_at = NOW()
            WHERE chat_room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Floors at zero so a drifted counter cannot fail a read.
    pub async fn decrement(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        user_id: &str,
        by: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE unread_counters
            SET unread_count = GREATEST(unread_count - $3, 0), updated_at = NOW()
            WHERE chat_room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(by)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, room_id: Uuid, user_id: &str) -> Result<Option<i64>, DatabaseError> {
        let record: Option<(i64,)> = sqlx::query_as(
            "SELECT unread_count FROM unread_counters WHERE chat_room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|r| r.0))
    }

    pub async fn get_in_tx(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        user_id: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        let record: Option<(i64,)> = sqlx::query_as(
            "SELECT unread_count FROM unread_counters WHERE chat_room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(|r| r.0))
    }

    /// Upserts so reconciliation also repairs a missing counter row.
    pub async fn set(
        &self,
        conn: &mut PgConnection,
        room_id: Uuid,
        user_id: &str,
        count: i64,
    ) -> Result<UnreadCount, DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO unread_counters (chat_room_id, user_id, unread_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (chat_room_id, user_id)
            DO UPDATE SET unread_count = EXCLUDED.unread_count, updated_at = NOW()
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(count)
        .execute(conn)
        .await?;

        Ok(UnreadCount {
            chat_room_id: room_id,
            user_id: user_id.to_string(),
            count,
        })
    }
}
