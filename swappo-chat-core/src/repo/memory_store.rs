use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AppendedMessage, ChatStore, Deactivation};
use crate::error::{ChatError, ChatResult};
use crate::models::{
    ChatRoom, ChatStatistics, CounterCorrection, Message, MessagePage, MessagePreview,
    MessageStatus, NewMessage, NewRoom, NotificationState, NotificationTask, Page,
    ReconcileReport, RoomFilter, RoomOverview, StatusChange, UnreadCount,
};

struct RoomRecord {
    room: ChatRoom,
    /// Message ids in ledger order; `seq` is the position plus one.
    ledger: Vec<Uuid>,
}

#[derive(Default)]
struct MemoryState {
    rooms: HashMap<Uuid, RoomRecord>,
    by_trade_offer: HashMap<i64, Uuid>,
    messages: HashMap<Uuid, Message>,
    counters: HashMap<(Uuid, String), i64>,
    notifications: HashMap<Uuid, NotificationTask>,
}

impl MemoryState {
    fn room(&self, room_id: Uuid) -> ChatResult<&ChatRoom> {
        self.rooms
            .get(&room_id)
            .map(|r| &r.room)
            .ok_or_else(|| ChatError::room_not_found(room_id))
    }

    fn count_unread_for(&self, room_id: Uuid, user_id: &str) -> i64 {
        self.rooms
            .get(&room_id)
            .map(|record| {
                record
                    .ledger
                    .iter()
                    .filter_map(|id| self.messages.get(id))
                    .filter(|m| m.sender_id != user_id && !m.is_read())
                    .count() as i64
            })
            .unwrap_or(0)
    }

    fn decrement(&mut self, room_id: Uuid, user_id: &str, by: i64) {
        if let Some(count) = self.counters.get_mut(&(room_id, user_id.to_string())) {
            *count = (*count - by).max(0);
        }
    }

    fn last_message(&self, room_id: Uuid) -> Option<&Message> {
        self.rooms
            .get(&room_id)
            .and_then(|r| r.ledger.last())
            .and_then(|id| self.messages.get(id))
    }
}

/// `ChatStore` held entirely in process memory.
///
/// Each operation runs inside one critical section of a single mutex, which
/// gives the same all-or-nothing and per-room serialisation guarantees as the
/// PostgreSQL store. The lock is never held across an `.await`.
#[derive(Default)]
pub struct MemoryChatStore {
    state: Mutex<MemoryState>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> ChatResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ChatError::Internal("memory store lock poisoned".to_string()))
    }

    /// Overwrites a stored counter without touching the ledger. Used to
    /// simulate drift, for example a crash between a ledger write and the
    /// counter update.
    pub fn overwrite_unread_counter(
        &self,
        room_id: Uuid,
        user_id: &str,
        count: i64,
    ) -> ChatResult<()> {
        let mut state = self.state()?;
        state.room(room_id)?;
        state
            .counters
            .insert((room_id, user_id.to_string()), count.max(0));
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        let mut state = self.state()?;
        if state.by_trade_offer.contains_key(&room.trade_offer_id) {
            return Err(ChatError::DuplicateRoom {
                trade_offer_id: room.trade_offer_id,
            });
        }

        let created = ChatRoom::new(room);
        state.by_trade_offer.insert(created.trade_offer_id, created.id);
        for user_id in created.participants() {
            state.counters.insert((created.id, user_id.to_string()), 0);
        }
        state.rooms.insert(
            created.id,
            RoomRecord {
                room: created.clone(),
                ledger: Vec::new(),
            },
        );
        Ok(created)
    }

    async fn get_room(&self, room_id: Uuid) -> ChatResult<Option<ChatRoom>> {
        let state = self.state()?;
        Ok(state.rooms.get(&room_id).map(|r| r.room.clone()))
    }

    async fn get_room_by_trade_offer(&self, trade_offer_id: i64) -> ChatResult<Option<ChatRoom>> {
        let state = self.state()?;
        Ok(state
            .by_trade_offer
            .get(&trade_offer_id)
            .and_then(|id| state.rooms.get(id))
            .map(|r| r.room.clone()))
    }

    async fn list_rooms(
        &self,
        user_id: &str,
        filter: RoomFilter,
        page: Page,
    ) -> ChatResult<Vec<RoomOverview>> {
        let state = self.state()?;
        let mut rooms: Vec<&ChatRoom> = state
            .rooms
            .values()
            .map(|r| &r.room)
            .filter(|room| room.is_participant(user_id))
            .filter(|room| !filter.active_only || room.is_active)
            .collect();
        rooms.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(rooms
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|room| RoomOverview {
                room: room.clone(),
                last_message: state.last_message(room.id).map(|m| MessagePreview {
                    content: m.content.clone(),
                    sender_id: m.sender_id.clone(),
                    created_at: m.created_at,
                }),
                unread_count: state
                    .counters
                    .get(&(room.id, user_id.to_string()))
                    .copied()
                    .unwrap_or(0),
            })
            .collect())
    }

    async fn room_is_active(&self, room_id: Uuid) -> ChatResult<Option<bool>> {
        let state = self.state()?;
        Ok(state
            .rooms
            .get(&room_id)
            .map(|r| r.room.is_active))
    }

    async fn deactivate_room(
        &self,
        room_id: Uuid,
        requester_id: &str,
    ) -> ChatResult<Deactivation> {
        let mut state = self.state()?;
        let mut room = state.room(room_id)?.clone();
        if !room.is_participant(requester_id) {
            return Err(ChatError::forbidden(format!(
                "user '{}' cannot deactivate room {}",
                requester_id, room_id
            )));
        }
        room.deactivate(Utc::now())?;

        if let Some(record) = state.rooms.get_mut(&room_id) {
            record.room = room.clone();
        }
        let before = state.notifications.len();
        state.notifications.retain(|_, t| t.chat_room_id != room_id);
        let cancelled_notifications = (before - state.notifications.len()) as u64;

        Ok(Deactivation {
            room,
            cancelled_notifications,
        })
    }

    async fn append_message(&self, message: &NewMessage) -> ChatResult<AppendedMessage> {
        let mut state = self.state()?;
        let room = state.room(message.chat_room_id)?;
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
        let room_id = room.id;

        let now = Utc::now();
        let record = state
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        let seq = record.ledger.len() as i64 + 1;
        let mut stored = Message::new(
            room_id,
            seq,
            message.sender_id.clone(),
            message.content.clone(),
        );
        stored.created_at = now;
        stored.updated_at = now;
        record.ledger.push(stored.id);
        record.room.last_message_at = Some(now);
        record.room.updated_at = now;

        let notification = NotificationTask::for_message(&stored, &recipient);
        state.messages.insert(stored.id, stored.clone());
        *state.counters.entry((room_id, recipient)).or_insert(0) += 1;
        state
            .notifications
            .insert(notification.id, notification.clone());

        Ok(AppendedMessage {
            message: stored,
            notification,
        })
    }

    async fn get_message(&self, message_id: Uuid) -> ChatResult<Option<Message>> {
        let state = self.state()?;
        Ok(state.messages.get(&message_id).cloned())
    }

    async fn list_messages(&self, room_id: Uuid, page: MessagePage) -> ChatResult<Vec<Message>> {
        let state = self.state()?;
        state.room(room_id)?;
        let ledger = state
            .rooms
            .get(&room_id)
            .map(|r| r.ledger.as_slice())
            .unwrap_or_default();

        Ok(ledger
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| page.after_seq.map_or(true, |after| m.seq > after))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn advance_message(
        &self,
        message_id: Uuid,
        reader_id: &str,
        status: MessageStatus,
    ) -> ChatResult<StatusChange> {
        let mut state = self.state()?;
        let mut message = state
            .messages
            .get(&message_id)
            .cloned()
            .ok_or(ChatError::MessageNotFound(message_id))?;
        let room = state.room(message.chat_room_id)?;

        if message.sender_id == reader_id {
            return Err(ChatError::forbidden(format!(
                "user '{}' sent message {} and cannot acknowledge it",
                reader_id, message_id
            )));
        }
        if !room.is_participant(reader_id) {
            return Err(ChatError::forbidden(format!(
                "user '{}' is not a participant of room {}",
                reader_id, room.id
            )));
        }

        let changed = message.advance(status, Utc::now());
        if changed {
            state.messages.insert(message_id, message.clone());
            if status == MessageStatus::Read {
                state.decrement(message.chat_room_id, reader_id, 1);
            }
        }
        Ok(StatusChange { message, changed })
    }

    async fn mark_all_read(&self, room_id: Uuid, reader_id: &str) -> ChatResult<u64> {
        let mut state = self.state()?;
        state.room(room_id)?.ensure_participant(reader_id)?;

        let ledger = state
            .rooms
            .get(&room_id)
            .map(|r| r.ledger.clone())
            .unwrap_or_default();
        let now = Utc::now();
        let mut transitioned = 0u64;
        for id in ledger {
            if let Some(message) = state.messages.get_mut(&id) {
                if message.sender_id != reader_id && message.advance(MessageStatus::Read, now) {
                    transitioned += 1;
                }
            }
        }
        state.decrement(room_id, reader_id, transitioned as i64);
        Ok(transitioned)
    }

    async fn unread_count(&self, room_id: Uuid, user_id: &str) -> ChatResult<i64> {
        let state = self.state()?;
        state.room(room_id)?;
        state
            .counters
            .get(&(room_id, user_id.to_string()))
            .copied()
            .ok_or_else(|| ChatError::UnreadCounterNotFound {
                room_id,
                user_id: user_id.to_string(),
            })
    }

    async fn reconcile_unread(&self, room_id: Uuid) -> ChatResult<ReconcileReport> {
        let mut state = self.state()?;
        let participants: Vec<String> = state
            .room(room_id)?
            .participants()
            .iter()
            .map(|p| p.to_string())
            .collect();

        let mut counts = Vec::with_capacity(2);
        let mut corrections = Vec::new();
        for user_id in participants {
            let recomputed = state.count_unread_for(room_id, &user_id);
            let stored = state
                .counters
                .insert((room_id, user_id.clone()), recomputed);
            if stored != Some(recomputed) {
                corrections.push(CounterCorrection {
                    user_id: user_id.clone(),
                    stored: stored.unwrap_or(0),
                    recomputed,
                });
            }
            counts.push(UnreadCount {
                chat_room_id: room_id,
                user_id,
                count: recomputed,
            });
        }

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
        let state = self.state()?;
        let mut due: Vec<NotificationTask> = state
            .notifications
            .values()
            .filter(|t| !t.state.is_terminal() && t.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_notification(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> ChatResult<Option<NotificationTask>> {
        let mut state = self.state()?;
        let Some(stored) = state.notifications.get_mut(&task_id) else {
            return Ok(None);
        };
        let claimable = stored.state == NotificationState::InFlight
            || stored.state.can_transition_to(NotificationState::InFlight);
        if !claimable || stored.next_attempt_at > now {
            return Ok(None);
        }

        stored.state = NotificationState::InFlight;
        stored.attempts += 1;
        stored.next_attempt_at = lease_until;
        stored.updated_at = now;
        Ok(Some(stored.clone()))
    }

    async fn record_notification_attempt(&self, task: &NotificationTask) -> ChatResult<bool> {
        let mut state = self.state()?;
        match state.notifications.get_mut(&task.id) {
            Some(stored)
                if stored.state == NotificationState::InFlight
                    && stored.attempts == task.attempts =>
            {
                stored.state = task.state;
                stored.next_attempt_at = task.next_attempt_at;
                stored.last_error = task.last_error.clone();
                stored.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_notification(&self, task_id: Uuid) -> ChatResult<bool> {
        let mut state = self.state()?;
        Ok(state.notifications.remove(&task_id).is_some())
    }

    async fn pending_notifications(&self) -> ChatResult<i64> {
        let state = self.state()?;
        Ok(state.notifications.len() as i64)
    }

    async fn statistics(&self, user_id: Option<&str>) -> ChatResult<ChatStatistics> {
        let state = self.state()?;
        let rooms: Vec<&RoomRecord> = state
            .rooms
            .values()
            .filter(|r| user_id.map_or(true, |u| r.room.is_participant(u)))
            .collect();

        Ok(ChatStatistics {
            total_rooms: rooms.len() as i64,
            active_rooms: rooms
                .iter()
                .filter(|r| r.room.is_active)
                .count() as i64,
            total_messages: rooms.iter().map(|r| r.ledger.len() as i64).sum(),
            total_unread_messages: state
                .counters
                .iter()
                .filter(|((_, user), _)| user_id.map_or(true, |u| u == user))
                .map(|(_, count)| *count)
                .sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_room() -> (MemoryChatStore, ChatRoom) {
        let store = MemoryChatStore::new();
        let room = store
            .create_room(&NewRoom::new(1, "alice", "bob"))
            .await
            .unwrap();
        (store, room)
    }

    #[tokio::test]
    async fn test_duplicate_trade_offer_rejected() {
        let (store, _) = store_with_room().await;
        let err = store
            .create_room(&NewRoom::new(1, "carol", "dave"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::DuplicateRoom { trade_offer_id: 1 }));
        assert_eq!(store.statistics(None).await.unwrap().total_rooms, 1);
    }

    #[tokio::test]
    async fn test_append_writes_counter_and_outbox() {
        let (store, room) = store_with_room().await;
        let appended = store
            .append_message(&NewMessage::new(room.id, "alice", "hi"))
            .await
            .unwrap();

        assert_eq!(appended.message.seq, 1);
        assert_eq!(appended.notification.recipient_id, "bob");
        assert_eq!(store.unread_count(room.id, "bob").await.unwrap(), 1);
        assert_eq!(store.unread_count(room.id, "alice").await.unwrap(), 0);
        assert_eq!(store.pending_notifications().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_drops_outbox_rows() {
        let (store, room) = store_with_room().await;
        store
            .append_message(&NewMessage::new(room.id, "alice", "hi"))
            .await
            .unwrap();

        let deactivation = store.deactivate_room(room.id, "bob").await.unwrap();
        assert_eq!(deactivation.cancelled_notifications, 1);
        assert!(!deactivation.room.is_active);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_leases_row_to_one_owner() {
        let (store, room) = store_with_room().await;
        let appended = store
            .append_message(&NewMessage::new(room.id, "alice", "hi"))
            .await
            .unwrap();
        let task_id = appended.notification.id;
        let now = Utc::now();
        let lease_until = now + chrono::Duration::seconds(30);

        let claimed = store
            .claim_notification(task_id, now, lease_until)
            .await
            .unwrap()
            .expect("due row should be claimable");
        assert_eq!(claimed.state, NotificationState::InFlight);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.next_attempt_at, lease_until);

        assert!(store
            .claim_notification(task_id, now, lease_until)
            .await
            .unwrap()
            .is_none());
        assert!(store.due_notifications(now, 10).await.unwrap().is_empty());

        let after_expiry = lease_until + chrono::Duration::seconds(1);
        let reclaimed = store
            .claim_notification(task_id, after_expiry, after_expiry)
            .await
            .unwrap()
            .expect("expired lease should be claimable");
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn test_stale_attempt_cannot_overwrite_newer_claim() {
        let (store, room) = store_with_room().await;
        let appended = store
            .append_message(&NewMessage::new(room.id, "alice", "hi"))
            .await
            .unwrap();
        let now = Utc::now();

        let first = store
            .claim_notification(appended.notification.id, now, now)
            .await
            .unwrap()
            .unwrap();
        store
            .claim_notification(appended.notification.id, now, now)
            .await
            .unwrap()
            .unwrap();

        let mut stale = first;
        stale.state = NotificationState::Retrying;
        assert!(!store.record_notification_attempt(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_advance_by_outsider_is_forbidden() {
        let (store, room) = store_with_room().await;
        let appended = store
            .append_message(&NewMessage::new(room.id, "alice", "hi"))
            .await
            .unwrap();

        let err = store
            .advance_message(appended.message.id, "mallory", MessageStatus::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unread_count_unknown_user() {
        let (store, room) = store_with_room().await;
        let err = store.unread_count(room.id, "mallory").await.unwrap_err();
        assert!(matches!(err, ChatError::UnreadCounterNotFound { .. }));

        let err = store.unread_count(Uuid::new_v4(), "bob").await.unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_rooms_orders_by_activity() {
        let store = MemoryChatStore::new();
        let first = store
            .create_room(&NewRoom::new(1, "alice", "bob"))
            .await
            .unwrap();
        let second = store
            .create_room(&NewRoom::new(2, "alice", "carol"))
            .await
            .unwrap();
        store
            .append_message(&NewMessage::new(first.id, "bob", "newest"))
            .await
            .unwrap();

        let rooms = store
            .list_rooms("alice", RoomFilter::default(), Page::first(10))
            .await
            .unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room.id, first.id);
        assert_eq!(rooms[0].unread_count, 1);
        assert_eq!(
            rooms[0].last_message.as_ref().map(|m| m.content.as_str()),
            Some("newest")
        );
        assert_eq!(rooms[1].room.id, second.id);
        assert!(rooms[1].last_message.is_none());
    }
}
