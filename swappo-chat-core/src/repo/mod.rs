pub mod memory_store;
pub mod message_repo;
pub mod notification_repo;
pub mod pg_store;
pub mod room_repo;
pub mod stats_repo;
pub mod unread_repo;

pub use memory_store::MemoryChatStore;
pub use message_repo::MessageRepository;
pub use notification_repo::NotificationRepository;
pub use pg_store::PgChatStore;
pub use room_repo::RoomRepository;
pub use stats_repo::StatsRepository;
pub use unread_repo::UnreadRepository;

use crate::error::ChatResult;
use crate::models::{
    ChatRoom, ChatStatistics, Message, MessagePage, MessageStatus, NewMessage, NewRoom,
    NotificationTask, Page, ReconcileReport, RoomFilter, RoomOverview, StatusChange,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A committed append together with the outbox row written alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendedMessage {
    pub message: Message,
    pub notification: NotificationTask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deactivation {
    pub room: ChatRoom,
    /// Outbox rows for the room removed in the same unit of work.
    pub cancelled_notifications: u64,
}

/// Unit-of-work storage for rooms, the message ledger, unread counters and
/// the notification outbox.
///
/// Every room-scoped mutation runs as one atomic unit serialised on the room:
/// an append allocates its sequence number, bumps the recipient's counter and
/// writes the outbox row, or nothing happens at all. Implementations report
/// domain failures (`RoomNotFound`, `RoomInactive`, `Forbidden`, ...) rather
/// than returning partial results.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Fails with `DuplicateRoom` when the trade offer already has a room,
    /// active or not.
    async fn create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom>;

    async fn get_room(&self, room_id: Uuid) -> ChatResult<Option<ChatRoom>>;

    async fn get_room_by_trade_offer(&self, trade_offer_id: i64) -> ChatResult<Option<ChatRoom>>;

    async fn list_rooms(
        &self,
        user_id: &str,
        filter: RoomFilter,
        page: Page,
    ) -> ChatResult<Vec<RoomOverview>>;

    /// `None` when the room does not exist.
    async fn room_is_active(&self, room_id: Uuid) -> ChatResult<Option<bool>>;

    async fn deactivate_room(&self, room_id: Uuid, requester_id: &str)
        -> ChatResult<Deactivation>;

    async fn append_message(&self, message: &NewMessage) -> ChatResult<AppendedMessage>;

    async fn get_message(&self, message_id: Uuid) -> ChatResult<Option<Message>>;

    /// Ascending by sequence number. Unknown rooms fail with `RoomNotFound`.
    async fn list_messages(&self, room_id: Uuid, page: MessagePage) -> ChatResult<Vec<Message>>;

    /// Moves a single message forward to `status` on behalf of its recipient.
    /// Reaching `Read` decrements the reader's counter in the same unit.
    async fn advance_message(
        &self,
        message_id: Uuid,
        reader_id: &str,
        status: MessageStatus,
    ) -> ChatResult<StatusChange>;

    async fn mark_all_read(&self, room_id: Uuid, reader_id: &str) -> ChatResult<u64>;

    async fn unread_count(&self, room_id: Uuid, user_id: &str) -> ChatResult<i64>;

    /// Recomputes both participants' counters from the ledger and overwrites
    /// the stored values.
    async fn reconcile_unread(&self, room_id: Uuid) -> ChatResult<ReconcileReport>;

    /// Non-terminal outbox rows whose next attempt is due at `now`.
    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> ChatResult<Vec<NotificationTask>>;

    /// Atomically takes the next attempt of a due row: moves it to
    /// `InFlight`, increments `attempts` and pushes `next_attempt_at` to
    /// `lease_until` so no other dispatcher sees it as due. `None` when the
    /// row is gone or not due, which means another dispatcher owns it.
    async fn claim_notification(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> ChatResult<Option<NotificationTask>>;

    /// Persists state, schedule and last error of `task` after an attempt.
    /// Only the holder of that attempt may write: returns false when the row
    /// is gone (room deactivated) or has been claimed again since.
    async fn record_notification_attempt(&self, task: &NotificationTask) -> ChatResult<bool>;

    async fn remove_notification(&self, task_id: Uuid) -> ChatResult<bool>;

    async fn pending_notifications(&self) -> ChatResult<i64>;

    async fn statistics(&self, user_id: Option<&str>) -> ChatResult<ChatStatistics>;
}
