use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStatistics {
    pub total_rooms: i64,
    pub active_rooms: i64,
    pub total_messages: i64,
    pub total_unread_messages: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub chat_room_id: Uuid,
    pub user_id: String,
    pub count: i64,
}

/// Counter values before and after a recomputation from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterCorrection {
    pub user_id: String,
    pub stored: i64,
    pub recomputed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub chat_room_id: Uuid,
    pub counts: Vec<UnreadCount>,
    pub corrections: Vec<CounterCorrection>,
}

impl ReconcileReport {
    pub fn had_drift(&self) -> bool {
        !self.corrections.is_empty()
    }

    pub fn count_for(&self, user_id: &str) -> Option<i64> {
        self.counts
            .iter()
            .find(|c| c.user_id == user_id)
            .map(|c| c.count)
    }
}
