#![allow(clippy::derivable_impls, clippy::type_complexity, clippy::manual_clamp)]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod repo;
pub mod services;

pub use config::{
    ChatConfig, ConfigLoadError, DatabaseConfig, LoggingConfig, MessagesConfig,
    NotificationConfig,
};
pub use db::{Database, DatabaseError};
pub use error::{retry_async_with_config, ChatError, ChatResult, RetryConfig};
pub use models::{
    ChatRoom, ChatStatistics, CounterCorrection, DispatchOutcome, Message, MessagePage,
    MessagePreview, MessageStatus, NewMessage, NewRoom, NotificationState, NotificationTask, Page,
    ReconcileReport, RoomFilter, RoomOverview, StatusChange, UnreadCount, PREVIEW_CHARS,
};
pub use notify::{
    DispatcherSnapshot, HttpNotificationClient, NoopNotificationSink, NotificationDispatcher,
    NotificationPayload, NotificationSink,
};
pub use repo::{AppendedMessage, ChatStore, Deactivation, MemoryChatStore, PgChatStore};
pub use services::{ChatService, MessageLedger, RoomRegistry, UnreadTracker};
