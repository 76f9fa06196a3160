use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::{MessageLedger, RoomRegistry, UnreadTracker};
use crate::config::ChatConfig;
use crate::db::Database;
use crate::error::ChatResult;
use crate::models::{
    ChatRoom, ChatStatistics, Message, MessagePage, NewMessage, NewRoom, Page, ReconcileReport,
    RoomFilter, RoomOverview, StatusChange,
};
use crate::notify::{
    DispatcherSnapshot, HttpNotificationClient, NoopNotificationSink, NotificationDispatcher,
    NotificationSink,
};
use crate::repo::{ChatStore, Deactivation, PgChatStore};

/// Entry point for callers. Composes the registry, the ledger, the unread
/// tracker and the notification dispatcher over one store.
///
/// Sending a message returns once the append has committed. The notification
/// is handed to the dispatcher afterwards and its outcome never reaches the
/// sender.
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    rooms: RoomRegistry,
    ledger: MessageLedger,
    unread: UnreadTracker,
    dispatcher: NotificationDispatcher,
    database: Option<Database>,
}

impl ChatService {
    pub fn new(
        config: &ChatConfig,
        store: Arc<dyn ChatStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            rooms: RoomRegistry::new(store.clone(), &config.messages),
            ledger: MessageLedger::new(store.clone(), &config.messages),
            unread: UnreadTracker::new(store.clone()),
            dispatcher: NotificationDispatcher::new(store.clone(), sink, &config.notifications),
            store,
            database: None,
        }
    }

    /// Picks the HTTP client or the no-op sink from `notifications.enabled`.
    pub fn with_store(config: &ChatConfig, store: Arc<dyn ChatStore>) -> ChatResult<Self> {
        let sink: Arc<dyn NotificationSink> = if config.notifications.enabled {
            Arc::new(HttpNotificationClient::new(&config.notifications)?)
        } else {
            Arc::new(NoopNotificationSink)
        };
        Ok(Self::new(config, store, sink))
    }

    /// Connects to PostgreSQL, applies migrations and builds the service.
    pub async fn connect(config: &ChatConfig) -> ChatResult<Self> {
        let database = Database::connect(&config.database).await?;
        database.run_migrations().await?;

        let store = Arc::new(PgChatStore::from_database(&database));
        let mut service = Self::with_store(config, store)?;
        service.database = Some(database);
        Ok(service)
    }

    /// Starts the notification dispatcher, which first re-enqueues any due
    /// outbox rows.
    pub async fn start(&self) -> ChatResult<()> {
        self.dispatcher.start().await?;
        info!(sink = self.dispatcher.sink_name(), "Chat service started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        if let Some(database) = &self.database {
            database.close().await;
        }
        info!("Chat service stopped");
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_stats(&self) -> DispatcherSnapshot {
        self.dispatcher.stats()
    }

    pub async fn create_room(&self, request: &NewRoom) -> ChatResult<ChatRoom> {
        self.rooms.create(request).await
    }

    pub async fn get_room(&self, room_id: Uuid) -> ChatResult<ChatRoom> {
        self.rooms.get(room_id).await
    }

    pub async fn get_room_by_trade_offer(&self, trade_offer_id: i64) -> ChatResult<ChatRoom> {
        self.rooms.get_by_trade_offer(trade_offer_id).await
    }

    pub async fn list_rooms(
        &self,
        user_id: &str,
        filter: RoomFilter,
        page: Option<Page>,
    ) -> ChatResult<Vec<RoomOverview>> {
        self.rooms.list_for_user(user_id, filter, page).await
    }

    pub async fn deactivate_room(
        &self,
        room_id: Uuid,
        requester_id: &str,
    ) -> ChatResult<Deactivation> {
        self.rooms.deactivate(room_id, requester_id).await
    }

    pub async fn send_message(&self, message: &NewMessage) -> ChatResult<Message> {
        let appended = self.ledger.append(message).await?;

        if let Err(e) = self.dispatcher.enqueue(appended.notification) {
            warn!(
                message_id = %appended.message.id,
                "Notification left in outbox: {}",
                e
            );
        }
        Ok(appended.message)
    }

    pub async fn get_message(&self, message_id: Uuid) -> ChatResult<Message> {
        self.ledger.get(message_id).await
    }

    pub async fn list_messages(
        &self,
        room_id: Uuid,
        page: Option<MessagePage>,
    ) -> ChatResult<Vec<Message>> {
        self.ledger.list_for_room(room_id, page).await
    }

    pub async fn mark_read(&self, message_id: Uuid, reader_id: &str) -> ChatResult<StatusChange> {
        self.ledger.mark_read(message_id, reader_id).await
    }

    pub async fn mark_delivered(
        &self,
        message_id: Uuid,
        reader_id: &str,
    ) -> ChatResult<StatusChange> {
        self.ledger.mark_delivered(message_id, reader_id).await
    }

    pub async fn mark_all_read(&self, room_id: Uuid, reader_id: &str) -> ChatResult<u64> {
        self.ledger.mark_all_read(room_id, reader_id).await
    }

    pub async fn unread_count(&self, room_id: Uuid, user_id: &str) -> ChatResult<i64> {
        self.unread.get_count(room_id, user_id).await
    }

    pub async fn reconcile_unread(&self, room_id: Uuid) -> ChatResult<ReconcileReport> {
        self.unread.reconcile(room_id).await
    }

    /// Read-only aggregate over rooms, messages and counters, optionally
    /// restricted to one user's rooms.
    pub async fn statistics(&self, user_id: Option<&str>) -> ChatResult<ChatStatistics> {
        self.store.statistics(user_id).await
    }

    pub async fn pending_notifications(&self) -> ChatResult<i64> {
        self.store.pending_notifications().await
    }
}
