use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    AppendedMessage, ChatStore, Deactivation, MessageRepository, NotificationRepository,
    RoomRepository, StatsRepository, UnreadRepository,
};
use crate::db::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{
    ChatRoom, ChatStatistics, CounterCorrection, Message, MessagePage, MessageStatus, NewMessage,
    NewRoom, NotificationTask, Page, ReconcileReport, RoomFilter, RoomOverview, StatusChange,
};

/// `ChatStore` over PostgreSQL. Each mutation is one transaction that starts
/// with `SELECT ... FOR UPDATE` on the room row.
pub struct PgChatStore {
    pool: PgPool,
    rooms: RoomRepository,
    messages: MessageRepository,
    unread: UnreadRepository,
    notifications: NotificationRepository,
    stats: StatsRepository,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            rooms: RoomRepository::new(pool.clone()),
            messages: MessageRepository::new(pool.clone()),
            unread: UnreadRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool.clone()),
            stats: StatsRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        let candidate = ChatRoom::new(room);
        let mut tx = self.pool.begin().await?;

        let created = self
            .rooms
            .insert(&mut *tx, &candidate)
            .await?
            .ok_or(ChatError::DuplicateRoom {
                trade_offer_id: room.trade_offer_id,
            })?;
        self.unread
            .init(&mut *tx, created.id, created.participants())
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_room(&self, room_id: Uuid) -> ChatResult<Option<ChatRoom>> {
        Ok(self.rooms.get_by_id(room_id).await?)
    }

    async fn get_room_by_trade_offer(&self, trade_offer_id: i64) -> ChatResult<Option<ChatRoom>> {
        Ok(self.rooms.get_by_trade_offer(trade_offer_id).await?)
    }

    async fn list_rooms(
        &self,
        user_id: &str,
        filter: RoomFilter,
        page: Page,
    ) -> ChatResult<Vec<RoomOverview>> {
        Ok(self.rooms.list_for_user(user_id, filter, page).await?)
    }

    async fn room_is_active(&self, room_id: Uuid) -> ChatResult<Option<bool>> {
        Ok(self.rooms.is_active(room_id).await?)
    }

    async fn deactivate_room(
        &self,
        room_id: Uuid,
        requester_id: &str,
    ) -> ChatResult<Deactivation> {
        let mut tx = self.pool.begin().await?;

        let room = self
            .rooms
            .lock(&mut *tx, room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        if !room.is_participant(requester_id) {
            return Err(ChatError::forbidden(format!(
                "user '{}' cannot deactivate room {}",
                requester_id, room_id
            )));
        }
        if !room.is_active {
            return Err(ChatError::AlreadyInactive(room_id));
        }

        let room = self.rooms.deactivate(&mut *tx, room_id, Utc::now()).await?;
        let cancelled_notifications = self
            .notifications
            .delete_for_room(&mut *tx, room_id)
            .await?;

        tx.commit().await?;
        Ok(Deactivation {
            room,
            cancelled_notifications,
        })
    }

    async fn append_message(&self, message: &NewMessage) -> ChatResult<AppendedMessage> {
        let mut tx = self.pool.begin().await?;

        let room = self
            .rooms
            .lock(&mut *tx, message.chat_room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(message.chat_room_id))?;
        if !room.is_active {
            return Err(ChatError::RoomInactive(room.id));
        }
        let recipient = room
            .other_participant(&message.sender_id)
            .ok_or_else(|| ChatError::NotParticipant {
                user_id: message.sender_id.clone(),
                room_id: room.id,
            })?
            .to_string();

        let now = Utc::now();
        let seq = self.rooms.next_seq(&mut *tx, room.id, now).await?;
        let mut draft = Message::new(
            room.id,
            seq,
            message.sender_id.clone(),
            message.content.clone(),
        );
        draft.created_at = now;
        draft.updated_at = now;
        let stored = self.messages.insert(&mut *tx, &draft).await?;

        if !self.unread.increment(&mut *tx, room.id, &recipient).await? {
            warn!(room_id = %room.id, user_id = %recipient, "Unread counter missing, rebuilding");
            let count = self
                .messages
                .count_unread_for(&mut *tx, room.id, &recipient)
                .await?;
            self.unread.set(&mut *tx, room.id, &recipient, count).await?;
        }

        let task = NotificationTask::for_message(&stored, &recipient);
        let notification = self.notifications.insert(&mut *tx, &task).await?;

        tx.commit().await?;
        debug!(room_id = %room.id, seq, "Message appended");
        Ok(AppendedMessage {
            message: stored,
            notification,
        })
    }

    async fn get_message(&self, message_id: Uuid) -> ChatResult<Option<Message>> {
        Ok(self.messages.get_by_id(message_id).await?)
    }

    async fn list_messages(&self, room_id: Uuid, page: MessagePage) -> ChatResult<Vec<Message>> {
        if self.rooms.is_active(room_id).await?.is_none() {
            return Err(ChatError::room_not_found(room_id));
        }
        Ok(self.messages.list(room_id, page).await?)
    }

    async fn advance_message(
        &self,
        message_id: Uuid,
        reader_id: &str,
        status: MessageStatus,
    ) -> ChatResult<StatusChange> {
        let room_id = self
            .messages
            .room_of(message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))?;

        let mut tx = self.pool.begin().await?;
        let room = self
            .rooms
            .lock(&mut *tx, room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        let mut message = self
            .messages
            .lock(&mut *tx, message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))?;

        if message.sender_id == reader_id {
            return Err(ChatError::forbidden(format!(
                "user '{}' sent message {} and cannot acknowledge it",
                reader_id, message_id
            )));
        }
        if !room.is_participant(reader_id) {
            return Err(ChatError::forbidden(format!(
                "user '{}' is not a participant of room {}",
                reader_id, room_id
            )));
        }

        let changed = message.advance(status, Utc::now());
        if changed {
            message = self.messages.set_status(&mut *tx, &message).await?;
            if status == MessageStatus::Read {
                self.unread.decrement(&mut *tx, room_id, reader_id, 1).await?;
            }
        }

        tx.commit().await?;
        Ok(StatusChange { message, changed })
    }

    async fn mark_all_read(&self, room_id: Uuid, reader_id: &str) -> ChatResult<u64> {
        let mut tx = self.pool.begin().await?;

        let room = self
            .rooms
            .lock(&mut *tx, room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        room.ensure_participant(reader_id)?;

        let transitioned = self
            .messages
            .mark_all_read(&mut *tx, room_id, reader_id, Utc::now())
            .await?;
        if transitioned > 0 {
            self.unread
                .decrement(&mut *tx, room_id, reader_id, transitioned as i64)
                .await?;
        }

        tx.commit().await?;
        Ok(transitioned)
    }

    async fn unread_count(&self, room_id: Uuid, user_id: &str) -> ChatResult<i64> {
        if let Some(count) = self.unread.get(room_id, user_id).await? {
            return Ok(count);
        }
        match self.rooms.get_by_id(room_id).await? {
            None => Err(ChatError::room_not_found(room_id)),
            Some(_) => Err(ChatError::UnreadCounterNotFound {
                room_id,
                user_id: user_id.to_string(),
            }),
        }
    }

    async fn reconcile_unread(&self, room_id: Uuid) -> ChatResult<ReconcileReport> {
        let mut tx = self.pool.begin().await?;

        let room = self
            .rooms
            .lock(&mut *tx, room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(room_id))?;

        let mut counts = Vec::with_capacity(2);
        let mut corrections = Vec::new();
        for user_id in room.participants() {
            let stored = self.unread.get_in_tx(&mut *tx, room_id, user_id).await?;
            let recomputed = self
                .messages
                .count_unread_for(&mut *tx, room_id, user_id)
                .await?;
            if stored != Some(recomputed) {
                corrections.push(CounterCorrection {
                    user_id: user_id.to_string(),
                    stored: stored.unwrap_or(0),
                    recomputed,
                });
            }
            counts.push(self.unread.set(&mut *tx, room_id, user_id, recomputed).await?);
        }

        tx.commit().await?;
        Ok(ReconcileReport {
            chat_room_id: room_id,
            counts,
            corrections,
        })
    }

    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> ChatResult<Vec<NotificationTask>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(self.notifications.get_due(now, limit).await?)
    }

    async fn claim_notification(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> ChatResult<Option<NotificationTask>> {
        Ok(self.notifications.claim(task_id, now, lease_until).await?)
    }

    async fn record_notification_attempt(&self, task: &NotificationTask) -> ChatResult<bool> {
        Ok(self
            .notifications
            .record_attempt(
                task.id,
                task.state,
                task.attempts,
                task.next_attempt_at,
                task.last_error.as_deref(),
            )
            .await?)
    }

    async fn remove_notification(&self, task_id: Uuid) -> ChatResult<bool> {
        Ok(self.notifications.delete(task_id).await?)
    }

    async fn pending_notifications(&self) -> ChatResult<i64> {
        Ok(self.notifications.count_pending().await?)
    }

    async fn statistics(&self, user_id: Option<&str>) -> ChatResult<ChatStatistics> {
        Ok(self.stats.get_statistics(user_id).await?)
    }
}
