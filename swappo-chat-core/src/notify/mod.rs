mod dispatcher;
mod sink;

pub use dispatcher::{DispatcherSnapshot, NotificationDispatcher};
pub use sink::{HttpNotificationClient, NoopNotificationSink, NotificationPayload, NotificationSink};
