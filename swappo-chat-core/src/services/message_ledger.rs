use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::MessagesConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::{
    validate_user_id, Message, MessagePage, MessageStatus, NewMessage, StatusChange,
};
use crate::repo::{AppendedMessage, ChatStore};

/// Ordered messages per room and their delivery status.
pub struct MessageLedger {
    store: Arc<dyn ChatStore>,
    max_body_len: usize,
    default_page_size: u32,
    max_page_size: u32,
}

impl MessageLedger {
    pub fn new(store: Arc<dyn ChatStore>, limits: &MessagesConfig) -> Self {
        Self {
            store,
            max_body_len: limits.max_body_len,
            default_page_size: limits.default_page_size,
            max_page_size: limits.max_page_size,
        }
    }

    /// Appends with status `Sent`. The recipient's counter increment and the
    /// outbox row commit with the message or not at all.
    pub async fn append(&self, message: &NewMessage) -> ChatResult<AppendedMessage> {
        validate_user_id("sender_id", &message.sender_id)?;
        message.validate(self.max_body_len)?;

        let appended = self.store.append_message(message).await?;
        debug!(
            room_id = %appended.message.chat_room_id,
            message_id = %appended.message.id,
            seq = appended.message.seq,
            "Message appended"
        );
        Ok(appended)
    }

    pub async fn get(&self, message_id: Uuid) -> ChatResult<Message> {
        self.store
            .get_message(message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))
    }

    pub async fn list_for_room(
        &self,
        room_id: Uuid,
        page: Option<MessagePage>,
    ) -> ChatResult<Vec<Message>> {
        let page = page
            .unwrap_or_else(|| MessagePage::first(self.default_page_size))
            .clamped(self.max_page_size);
        self.store.list_messages(room_id, page).await
    }

    /// No-op when the message is already read.
    pub async fn mark_read(&self, message_id: Uuid, reader_id: &str) -> ChatResult<StatusChange> {
        self.advance(message_id, reader_id, MessageStatus::Read).await
    }

    /// Recipient acknowledges receipt. Never touches unread counters.
    pub async fn mark_delivered(
        &self,
        message_id: Uuid,
        reader_id: &str,
    ) -> ChatResult<StatusChange> {
        self.advance(message_id, reader_id, MessageStatus::Delivered)
            .await
    }

    async fn advance(
        &self,
        message_id: Uuid,
        reader_id: &str,
        status: MessageStatus,
    ) -> ChatResult<StatusChange> {
        validate_user_id("reader_id", reader_id)?;
        let change = self
            .store
            .advance_message(message_id, reader_id, status)
            .await?;

        if change.changed {
            debug!(message_id = %message_id, status = %status, "Message status advanced");
        }
        Ok(change)
    }

    /// Returns how many of the other participant's messages became `Read`.
    pub async fn mark_all_read(&self, room_id: Uuid, reader_id: &str) -> ChatResult<u64> {
        validate_user_id("reader_id", reader_id)?;
        let transitioned = self.store.mark_all_read(room_id, reader_id).await?;
        debug!(room_id = %room_id, reader_id, transitioned, "Marked room as read");
        Ok(transitioned)
    }
}
