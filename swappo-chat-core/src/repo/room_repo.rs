use crate::db::DatabaseError;
use crate::models::{ChatRoom, MessagePreview, Page, RoomFilter, RoomOverview};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(FromRow)]
struct RoomOverviewRow {
    #[sqlx(flatten)]
    room: ChatRoom,
    last_content: Option<String>,
    last_sender_id: Option<String>,
    last_created_at: Option<DateTime<Utc>>,
    unread_count: i64,
}

impl From<RoomOverviewRow> for RoomOverview {
    fn from(row: RoomOverviewRow) -> Self {
        let last_message = match (row.last_content, row.last_sender_id, row.last_created_at) {
            (Some(content), Some(sender_id), Some(created_at)) => Some(MessagePreview {
                content,
                sender_id,
                created_at,
            }),
            _ => None,
        };
        RoomOverview {
            room: row.room,
            last_message,
            unread_count: row.unread_count,
        }
    }
}

pub struct RoomRepository {
    pool: PgPool,
}

impl RoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the room unless its trade offer already has one, in which case
    /// `None` is returned and nothing is written.
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        room: &ChatRoom,
    ) -> Result<Option<ChatRoom>, DatabaseError> {
        let record = sqlx::query_as::<_, ChatRoom>(
            r#"
            INSERT INTO chat_rooms (id, trade_offer_id, user1_id, user2_id, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (trade_offer_id) DO NOTHING
            RETURNING id, trade_offer_id, user1_id, user2_id, is_active, last_message_at,
                      created_at, updated_at, deactivated_at
            "#,
        )
        .bind(room.id)
        .bind(room.trade_offer_id)
        .bind(&room.user1_id)
        .bind(&room.user2_id)
        .bind(room.is_active)
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_optional(conn)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ChatRoom>, DatabaseError> {
        let record = sqlx::query_as::<_, ChatRoom>(
            r#"
            SELECT id, trade_offer_id, user1_id, user2_id, is_active, last_message_at,
                   created_at, updated_at, deactivated_at
            FROM chat_rooms
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_trade_offer(
        &self,
        trade_offer_id: i64,
    ) -> Result<Option<ChatRoom>, DatabaseError> {
        let record = sqlx::query_as::<_, ChatRoom>(
            r#"
            SELECT id, trade_offer_id, user1_id, user2_id, is_active, last_message_at,
                   created_at, updated_at, deactivated_at
            FROM chat_rooms
            WHERE trade_offer_id = $1
            "#,
        )
        .bind(trade_offer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn is_active(&self, id: Uuid) -> Result<Option<bool>, DatabaseError> {
        let record: Option<(bool,)> =
            sqlx::query_as("SELECT is_active FROM chat_rooms WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record.map(|r| r.0))
    }

    /// Row-locks the room for the rest of the transaction. Every mutation
    /// scoped to a room takes this lock first.
    pub async fn lock(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<ChatRoom>, DatabaseError> {
        let record = sqlx::query_as::<_, ChatRoom>(
            r#"
            SELECT id, trade_offer_id, user1_id, user2_id, is_active, last_message_at,
                   created_at, updated_at, deactivated_at
            FROM chat_rooms
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(record)
    }

    /// Allocates the next ledger position. The room must already be locked.
    pub async fn next_seq(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let seq: (i64,) = sqlx::query_as(
            r#"
            UPDATE chat_rooms
            SET message_seq = message_seq + 1, last_message_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING message_seq
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(conn)
        .await?;

        Ok(seq.0)
    }

    pub async fn deactivate(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ChatRoom, DatabaseError> {
        let record = sqlx::query_as::<_, ChatRoom>(
            r#"
            UPDATE chat_rooms
            SET is_active = FALSE, deactivated_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING id, trade_offer_id, user1_id, user2_id, is_active, last_message_at,
                      created_at, updated_at, deactivated_at
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        filter: RoomFilter,
        page: Page,
    ) -> Result<Vec<RoomOverview>, DatabaseError> {
        let rows = sqlx::query_as::<_, RoomOverviewRow>(
            r#"
            SELECT r.id, r.trade_offer_id, r.user1_id, r.user2_id, r.is_active, r.last_message_at,
                   r.created_at, r.updated_at, r.deactivated_at,
                   m.content AS last_content,
                   m.sender_id AS last_sender_id,
                   m.created_at AS last_created_at,
                   COALESCE(u.unread_count, 0) AS unread_count
            FROM chat_rooms r
            LEFT JOIN LATERAL (
                SELECT content, sender_id, created_at
                FROM messages
                WHERE chat_room_id = r.id
                ORDER BY seq DESC
                LIMIT 1
            ) m ON TRUE
            LEFT JOIN unread_counters u ON u.chat_room_id = r.id AND u.user_id = $1
            WHERE (r.user1_id = $1 OR r.user2_id = $1)
              AND (NOT $2 OR r.is_active)
            ORDER BY COALESCE(r.last_message_at, r.created_at) DESC, r.id
            OFFSET $3
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(filter.active_only)
        .bind(i64::from(page.offset))
        .bind(i64::from(page.limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RoomOverview::from).collect())
    }
}
