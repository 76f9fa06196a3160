use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// Delivery status. Transitions only move forward: sent, delivered, read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Delivered => write!(f, "delivered"),
            MessageStatus::Read => write!(f, "read"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(ChatError::ValidationError(format!(
                "unknown message status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub chat_room_id: Uuid,
    /// Position in the room's ledger, starting at 1.
    pub seq: i64,
    pub sender_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(chat_room_id: Uuid, seq: i64, sender_id: String, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            chat_room_id,
            seq,
            sender_id,
            content,
            status: MessageStatus::Sent,
            read_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_read(&self) -> bool {
        self.status == MessageStatus::Read
    }

    /// Move to `next` if that is forward progress. Returns whether anything changed.
    pub fn advance(&mut self, next: MessageStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == MessageStatus::Read {
            self.read_at = Some(at);
        }
        self.updated_at = at;
        true
    }

    pub fn preview(&self, max_chars: usize) -> String {
        preview_text(&self.content, max_chars)
    }
}

fn preview_text(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

/// Input for appending a message to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub chat_room_id: Uuid,
    pub sender_id: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(
        chat_room_id: Uuid,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            chat_room_id,
            sender_id: sender_id.into(),
            content: content.into(),
        }
    }

    pub fn validate(&self, max_body_len: usize) -> ChatResult<()> {
        if self.content.trim().is_empty() {
            return Err(ChatError::EmptyBody);
        }
        let len = self.content.chars().count();
        if len > max_body_len {
            return Err(ChatError::BodyTooLong {
                len,
                max: max_body_len,
            });
        }
        Ok(())
    }
}

/// Pagination over a room's ledger: either skip `offset` rows or resume
/// strictly after `after_seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub offset: u32,
    pub after_seq: Option<i64>,
    pub limit: u32,
}

impl MessagePage {
    pub fn first(limit: u32) -> Self {
        Self {
            offset: 0,
            after_seq: None,
            limit,
        }
    }

    pub fn offset(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            after_seq: None,
            limit,
        }
    }

    pub fn after(seq: i64, limit: u32) -> Self {
        Self {
            offset: 0,
            after_seq: Some(seq),
            limit,
        }
    }

    pub fn clamped(self, max: u32) -> Self {
        Self {
            limit: self.limit.max(1).min(max),
            ..self
        }
    }
}

/// Result of a single-message status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub message: Message,
    /// False when the message already had the requested status or a later one.
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new(Uuid::new_v4(), 1, "alice".to_string(), "hello".to_string())
    }

    #[test]
    fn test_status_display_and_parse() {
        assert_eq!(MessageStatus::Sent.to_string(), "sent");
        assert_eq!(MessageStatus::Delivered.to_string(), "delivered");
        assert_eq!(MessageStatus::Read.to_string(), "read");
        assert_eq!("READ".parse::<MessageStatus>().unwrap(), MessageStatus::Read);
        assert!("lost".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use MessageStatus::*;
        assert!(Sent.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Read));
        assert!(Delivered.can_transition_to(Read));
        assert!(!Read.can_transition_to(Sent));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Read.can_transition_to(Read));
    }

    #[test]
    fn test_advance_sets_read_at_only_on_read() {
        let mut msg = message();
        let at = Utc::now();

        assert!(msg.advance(MessageStatus::Delivered, at));
        assert!(msg.read_at.is_none());

        assert!(msg.advance(MessageStatus::Read, at));
        assert_eq!(msg.read_at, Some(at));

        assert!(!msg.advance(MessageStatus::Delivered, Utc::now()));
        assert_eq!(msg.status, MessageStatus::Read);
        assert_eq!(msg.read_at, Some(at));
    }

    #[test]
    fn test_new_message_validation() {
        let room = Uuid::new_v4();
        assert!(NewMessage::new(room, "a", "hi").validate(10).is_ok());
        assert!(matches!(
            NewMessage::new(room, "a", "  \n\t").validate(10),
            Err(ChatError::EmptyBody)
        ));
        assert!(matches!(
            NewMessage::new(room, "a", "x".repeat(11)).validate(10),
            Err(ChatError::BodyTooLong { len: 11, max: 10 })
        ));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview_text("  short  ", 10), "short");
        let long = "é".repeat(20);
        let preview = preview_text(&long, 10);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 10);
    }
}
