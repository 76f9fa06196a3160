use crate::db::DatabaseError;
use crate::models::ChatStatistics;
use sqlx::PgPool;

pub struct StatsRepository {
    pool: PgPool,
}

impl StatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Aggregates over every room, or over the rooms of `user_id` when given.
    /// The unread total is then that user's own counters.
    pub async fn get_statistics(
        &self,
        user_id: Option<&str>,
    ) -> Result<ChatStatistics, DatabaseError> {
        let record = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM chat_rooms r
                 WHERE $1::TEXT IS NULL OR r.user1_id = $1 OR r.user2_id = $1),
                (SELECT COUNT(*) FROM chat_rooms r
                 WHERE r.is_active AND ($1::TEXT IS NULL OR r.user1_id = $1 OR r.user2_id = $1)),
                (SELECT COUNT(*) FROM messages m
                 JOIN chat_rooms r ON r.id = m.chat_room_id
                 WHERE $1::TEXT IS NULL OR r.user1_id = $1 OR r.user2_id = $1),
                (SELECT COALESCE(SUM(u.unread_count), 0)::BIGINT FROM unread_counters u
                 WHERE $1::TEXT IS NULL OR u.user_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatStatistics {
            total_rooms: record.0,
            active_rooms: record.1,
            total_messages: record.2,
            total_unread_messages: record.3,
        })
    }
}
