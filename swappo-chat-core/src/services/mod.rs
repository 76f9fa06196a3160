mod chat_service;
mod message_ledger;
mod room_registry;
mod unread_tracker;

pub use chat_service::ChatService;
pub use message_ledger::MessageLedger;
pub use room_registry::RoomRegistry;
pub use unread_tracker::UnreadTracker;
