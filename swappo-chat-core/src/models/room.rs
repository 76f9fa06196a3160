use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

const MAX_USER_ID_LEN: usize = 100;

/// A conversation bound to exactly one accepted trade offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ChatRoom {
    pub id: Uuid,
    pub trade_offer_id: i64,
    pub user1_id: String,
    pub user2_id: String,
    pub is_active: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl ChatRoom {
    pub fn new(request: &NewRoom) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trade_offer_id: request.trade_offer_id,
            user1_id: request.user1_id.clone(),
            user2_id: request.user2_id.clone(),
            is_active: true,
            last_message_at: None,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant who is not `user_id`, or `None` for outsiders.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if self.user1_id == user_id {
            Some(&self.user2_id)
        } else if self.user2_id == user_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }

    pub fn participants(&self) -> [&str; 2] {
        [&self.user1_id, &self.user2_id]
    }

    pub fn ensure_participant(&self, user_id: &str) -> ChatResult<()> {
        if self.is_participant(user_id) {
            Ok(())
        } else {
            Err(ChatError::NotParticipant {
                user_id: user_id.to_string(),
                room_id: self.id,
            })
        }
    }

    /// Deactivation is terminal; a second call reports `AlreadyInactive`.
    pub fn deactivate(&mut self, at: DateTime<Utc>) -> ChatResult<()> {
        if !self.is_active {
            return Err(ChatError::AlreadyInactive(self.id));
        }
        self.is_active = false;
        self.deactivated_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Ordering key for room listings, most recent first.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Input for creating a room once a trade offer has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoom {
    pub trade_offer_id: i64,
    pub user1_id: String,
    pub user2_id: String,
}

impl NewRoom {
    pub fn new(
        trade_offer_id: i64,
        user1_id: impl Into<String>,
        user2_id: impl Into<String>,
    ) -> Self {
        Self {
            trade_offer_id,
            user1_id: user1_id.into(),
            user2_id: user2_id.into(),
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        if self.trade_offer_id <= 0 {
            return Err(ChatError::ValidationError(format!(
                "trade_offer_id must be positive, got {}",
                self.trade_offer_id
            )));
        }
        validate_user_id("user1_id", &self.user1_id)?;
        validate_user_id("user2_id", &self.user2_id)?;
        if self.user1_id == self.user2_id {
            return Err(ChatError::ValidationError(
                "a chat room needs two distinct participants".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_user_id(field: &str, user_id: &str) -> ChatResult<()> {
    if user_id.trim().is_empty() {
        return Err(ChatError::ValidationError(format!("{} must not be empty", field)));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(ChatError::ValidationError(format!(
            "{} must be at most {} characters",
            field, MAX_USER_ID_LEN
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub content: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

/// A room as listed for one of its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOverview {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub last_message: Option<MessagePreview>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFilter {
    pub active_only: bool,
}

impl Default for RoomFilter {
    fn default() -> Self {
        Self { active_only: true }
    }
}

/// Offset pagination for room listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit }
    }

    /// Clamp `limit` into `1..=max`.
    pub fn clamped(self, max: u32) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.max(1).min(max),
        }
    }
}
