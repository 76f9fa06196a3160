pub mod messages;
pub mod output;
pub mod rooms;
pub mod stats;
pub mod unread;
pub mod worker;

pub use messages::{handle_messages_command, MessagesCommand};
pub use rooms::{handle_rooms_command, RoomsCommand};
pub use stats::handle_stats_command;
pub use unread::{handle_unread_command, UnreadCommand};
pub use worker::handle_worker_command;
