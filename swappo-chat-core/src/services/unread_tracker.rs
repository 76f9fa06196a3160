use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ChatResult;
use crate::models::{validate_user_id, ReconcileReport};
use crate::repo::ChatStore;

/// Read side of the per-room, per-user unread counters.
///
/// Counters move only inside ledger transactions: an append increments the
/// recipient and a read transition decrements the reader. This type exposes
/// the current value and the repair path.
pub struct UnreadTracker {
    store: Arc<dyn ChatStore>,
}

impl UnreadTracker {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// `RoomNotFound` for unknown rooms, `UnreadCounterNotFound` when the user
    /// is not one of the room's participants.
    pub async fn get_count(&self, room_id: Uuid, user_id: &str) -> ChatResult<i64> {
        validate_user_id("user_id", user_id)?;
        self.store.unread_count(room_id, user_id).await
    }

    /// Recomputes both counters from the ledger. Idempotent.
    pub async fn reconcile(&self, room_id: Uuid) -> ChatResult<ReconcileReport> {
        let report = self.store.reconcile_unread(room_id).await?;

        if report.had_drift() {
            for correction in &report.corrections {
                warn!(
                    room_id = %room_id,
                    user_id = %correction.user_id,
                    stored = correction.stored,
                    recomputed = correction.recomputed,
                    "Unread counter drift repaired"
                );
            }
        } else {
            info!(room_id = %room_id, "Unread counters consistent");
        }

        Ok(report)
    }
}
