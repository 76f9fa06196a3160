mod message;
mod notification;
mod room;
mod stats;

pub use message::{Message, MessagePage, MessageStatus, NewMessage, StatusChange};
pub use notification::{DispatchOutcome, NotificationState, NotificationTask, PREVIEW_CHARS};
pub use room::{ChatRoom, MessagePreview, NewRoom, Page, RoomFilter, RoomOverview};
pub use stats::{ChatStatistics, CounterCorrection, ReconcileReport, UnreadCount};

pub(crate) use room::validate_user_id;
