use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::message::Message;

/// Maximum characters of message content carried in a notification.
pub const PREVIEW_CHARS: usize = 100;

/// Lifecycle of a notification task:
/// `Pending -> InFlight -> {Delivered | Retrying -> InFlight | Exhausted}`,
/// with `Cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Pending,
    InFlight,
    Retrying,
    Delivered,
    Exhausted,
    Cancelled,
}

impl NotificationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NotificationState::Delivered
                | NotificationState::Exhausted
                | NotificationState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: NotificationState) -> bool {
        use NotificationState::*;
        match (self, next) {
            (Pending, InFlight) | (Retrying, InFlight) => true,
            (InFlight, Delivered) | (InFlight, Retrying) | (InFlight, Exhausted) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for NotificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationState::Pending => write!(f, "pending"),
            NotificationState::InFlight => write!(f, "in_flight"),
            NotificationState::Retrying => write!(f, "retrying"),
            NotificationState::Delivered => write!(f, "delivered"),
            NotificationState::Exhausted => write!(f, "exhausted"),
            NotificationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// "Tell `recipient_id` about `message_id`", persisted in the outbox in the
/// same transaction as the message append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NotificationTask {
    pub id: Uuid,
    pub message_id: Uuid,
    pub chat_room_id: Uuid,
    pub recipient_id: String,
    pub sender_id: String,
    pub preview: String,
    pub state: NotificationState,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationTask {
    pub fn for_message(message: &Message, recipient_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            message_id: message.id,
            chat_room_id: message.chat_room_id,
            recipient_id: recipient_id.to_string(),
            sender_id: message.sender_id.clone(),
            preview: message.preview(PREVIEW_CHARS),
            state: NotificationState::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Terminal result of a task, published by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub task_id: Uuid,
    pub message_id: Uuid,
    pub chat_room_id: Uuid,
    pub recipient_id: String,
    pub state: NotificationState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use NotificationState::*;

    #[test]
    fn test_state_machine() {
        assert!(Pending.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Delivered));
        assert!(InFlight.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Exhausted));
        assert!(Retrying.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Retrying.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(InFlight));
        assert!(!Exhausted.can_transition_to(Cancelled));
    }

    #[test]
    fn test_task_for_message_targets_recipient() {
        let message = Message::new(
            Uuid::new_v4(),
            1,
            "alice".to_string(),
            "x".repeat(500),
        );
        let task = NotificationTask::for_message(&message, "bob");

        assert_eq!(task.recipient_id, "bob");
        assert_eq!(task.sender_id, "alice");
        assert_eq!(task.message_id, message.id);
        assert_eq!(task.state, Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.preview.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(InFlight.to_string(), "in_flight");
        assert_eq!(Exhausted.to_string(), "exhausted");
    }
}
