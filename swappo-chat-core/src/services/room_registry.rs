use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MessagesConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::{validate_user_id, ChatRoom, NewRoom, Page, RoomFilter, RoomOverview};
use crate::repo::{ChatStore, Deactivation};

/// Owns chat rooms, their binding to a trade offer and their activation state.
pub struct RoomRegistry {
    store: Arc<dyn ChatStore>,
    default_page_size: u32,
    max_page_size: u32,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn ChatStore>, limits: &MessagesConfig) -> Self {
        Self {
            store,
            default_page_size: limits.default_room_page_size,
            max_page_size: limits.max_room_page_size,
        }
    }

    /// A trade offer gets at most one room, ever. A second call fails with
    /// `DuplicateRoom` and callers fetch the existing room themselves.
    pub async fn create(&self, request: &NewRoom) -> ChatResult<ChatRoom> {
        request.validate()?;
        let room = self.store.create_room(request).await?;

        info!(
            room_id = %room.id,
            trade_offer_id = room.trade_offer_id,
            "Chat room created"
        );
        Ok(room)
    }

    pub async fn get(&self, room_id: Uuid) -> ChatResult<ChatRoom> {
        self.store
            .get_room(room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(room_id))
    }

    pub async fn get_by_trade_offer(&self, trade_offer_id: i64) -> ChatResult<ChatRoom> {
        self.store
            .get_room_by_trade_offer(trade_offer_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(format!("trade offer {}", trade_offer_id)))
    }

    /// Most recent activity first. Each call re-queries from scratch.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        filter: RoomFilter,
        page: Option<Page>,
    ) -> ChatResult<Vec<RoomOverview>> {
        validate_user_id("user_id", user_id)?;
        let page = page
            .unwrap_or_else(|| Page::first(self.default_page_size))
            .clamped(self.max_page_size);

        let rooms = self.store.list_rooms(user_id, filter, page).await?;
        debug!(user_id, count = rooms.len(), "Listed chat rooms");
        Ok(rooms)
    }

    pub async fn is_active(&self, room_id: Uuid) -> ChatResult<bool> {
        self.store
            .room_is_active(room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(room_id))
    }

    /// Terminal. Messages are kept; sending is blocked and pending
    /// notifications for the room are dropped.
    pub async fn deactivate(&self, room_id: Uuid, requester_id: &str) -> ChatResult<Deactivation> {
        validate_user_id("requester_id", requester_id)?;
        let deactivation = self.store.deactivate_room(room_id, requester_id).await?;

        info!(
            room_id = %room_id,
            requester_id,
            cancelled_notifications = deactivation.cancelled_notifications,
            "Chat room deactivated"
        );
        Ok(deactivation)
    }
}
