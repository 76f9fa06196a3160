//! Error types for the Swappo Chat core library.
//!
//! Every fallible core operation returns [`ChatResult`]. Variants carry a
//! stable code in their display text so the API layer and the logs can refer
//! to a failure without parsing prose.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Database | Connection, query and migration errors |
//! | E2001-E2099 | Config | Config file and validation errors |
//! | E3001-E3099 | Room | Room lookup, conflicts and participant checks |
//! | E4001-E4099 | Message | Message lookup, body validation and unread counters |
//! | E5001-E5099 | Notification | Notification collaborator and dispatcher errors |
//! | E9001-E9099 | General | Internal, IO, serialization and validation errors |

use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry config for database connection attempts.
    pub fn for_database() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retry config for the notification collaborator.
    pub fn for_notifications() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Up to 25% on top of the capped delay
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Cheap jitter source based on the current timestamp, in `0.0..1.0`.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// The main error type for the Swappo Chat core library.
#[derive(Debug, Error)]
pub enum ChatError {
    // ========================================================================
    // Database Errors (E1001-E1099)
    // ========================================================================
    /// Failed to establish database connection
    #[error("[E1001] Database connection failed: {message}")]
    DatabaseConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database query execution failed
    #[error("[E1002] Database query failed: {0}")]
    DatabaseQueryFailed(String),

    /// Database migration failed
    #[error("[E1003] Database migration failed: {0}")]
    DatabaseMigrationFailed(String),

    /// Database pool exhausted or unavailable
    #[error("[E1004] Database pool unavailable: {0}")]
    DatabasePoolUnavailable(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    /// Configuration file parse error
    #[error("[E2002] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E2003] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // ========================================================================
    // Room Errors (E3001-E3099)
    // ========================================================================
    /// No room with the given id or trade offer
    #[error("[E3001] Chat room not found: {0}")]
    RoomNotFound(String),

    /// A room already exists for the trade offer, active or not
    #[error("[E3002] Chat room already exists for trade offer {trade_offer_id}")]
    DuplicateRoom { trade_offer_id: i64 },

    /// The room has been deactivated and accepts no new messages
    #[error("[E3003] Chat room {0} is not active")]
    RoomInactive(Uuid),

    /// Deactivation requested for a room that is already inactive
    #[error("[E3004] Chat room {0} is already inactive")]
    AlreadyInactive(Uuid),

    /// The acting user may not perform the operation
    #[error("[E3005] Forbidden: {0}")]
    Forbidden(String),

    /// The acting user is not one of the room's two participants
    #[error("[E3006] User '{user_id}' is not a participant in chat room {room_id}")]
    NotParticipant { user_id: String, room_id: Uuid },

    // ========================================================================
    // Message Errors (E4001-E4099)
    // ========================================================================
    /// No message with the given id
    #[error("[E4001] Message not found: {0}")]
    MessageNotFound(Uuid),

    /// Message body is empty or whitespace
    #[error("[E4002] Message body must not be empty")]
    EmptyBody,

    /// Message body exceeds the configured limit
    #[error("[E4003] Message body is {len} characters, maximum is {max}")]
    BodyTooLong { len: usize, max: usize },

    /// The user has no unread counter in the room
    #[error("[E4004] No unread counter for user '{user_id}' in chat room {room_id}")]
    UnreadCounterNotFound { room_id: Uuid, user_id: String },

    // ========================================================================
    // Notification Errors (E5001-E5099)
    // ========================================================================
    /// Request to the notification service failed
    #[error("[E5001] Notification request failed: {0}")]
    NotificationRequestFailed(String),

    /// Notification service answered with a non-2xx status
    #[error("[E5002] Notification service rejected request with HTTP {status}: {body}")]
    NotificationRejected { status: u16, body: String },

    /// Notification request exceeded its timeout
    #[error("[E5003] Notification request timed out: {0}")]
    NotificationTimeout(String),

    /// Notification service could not be reached
    #[error("[E5004] Notification service unavailable: {0}")]
    NotificationServiceUnavailable(String),

    /// The dispatcher is not running or has shut down
    #[error("[E5005] Notification dispatcher is closed")]
    DispatcherClosed,

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// Input validation error
    #[error("[E9002] Validation error: {0}")]
    ValidationError(String),

    /// IO error
    #[error("[E9003] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E9004] Serialization error: {0}")]
    SerializationError(String),
}

impl ChatError {
    /// Create a database connection error from a string message.
    pub fn database_connection_failed(message: impl Into<String>) -> Self {
        ChatError::DatabaseConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn room_not_found(id: impl ToString) -> Self {
        ChatError::RoomNotFound(id.to_string())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ChatError::Forbidden(message.into())
    }
}

/// Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => ChatError::DatabasePoolUnavailable(err.to_string()),
            sqlx::Error::PoolClosed => {
                ChatError::DatabasePoolUnavailable("Connection pool is closed".to_string())
            }
            sqlx::Error::RowNotFound => ChatError::DatabaseQueryFailed("Row not found".to_string()),
            sqlx::Error::Configuration(_) | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                ChatError::database_connection_failed(err.to_string())
            }
            sqlx::Error::Database(db_err) => ChatError::DatabaseQueryFailed(db_err.to_string()),
            _ => ChatError::DatabaseQueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ChatError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ChatError::DatabaseMigrationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::NotificationTimeout(err.to_string())
        } else if err.is_connect() {
            ChatError::NotificationServiceUnavailable(err.to_string())
        } else if let Some(status) = err.status() {
            ChatError::NotificationRejected {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            ChatError::NotificationRequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for ChatError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ChatError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => ChatError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => ChatError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => ChatError::ConfigParseError(err.to_string()),
        }
    }
}

impl From<crate::config::ConfigLoadError> for ChatError {
    fn from(err: crate::config::ConfigLoadError) -> Self {
        match err {
            crate::config::ConfigLoadError::Config(e) => e.into(),
            crate::config::ConfigLoadError::MissingRequired(key) => ChatError::InvalidConfigValue {
                key,
                message: "Missing required value".to_string(),
            },
            crate::config::ConfigLoadError::InvalidValue { key, message } => {
                ChatError::InvalidConfigValue { key, message }
            }
            crate::config::ConfigLoadError::Io(e) => e.into(),
        }
    }
}

impl From<crate::db::DatabaseError> for ChatError {
    fn from(err: crate::db::DatabaseError) -> Self {
        match err {
            crate::db::DatabaseError::ConnectionFailed(e) => e.into(),
            crate::db::DatabaseError::MigrationFailed(e) => {
                ChatError::DatabaseMigrationFailed(e.to_string())
            }
            crate::db::DatabaseError::InvalidConfig(msg) => ChatError::InvalidConfigValue {
                key: "database".to_string(),
                message: msg,
            },
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl ChatError {
    /// Returns true if this error is related to database operations.
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            ChatError::DatabaseConnectionFailed { .. }
                | ChatError::DatabaseQueryFailed(_)
                | ChatError::DatabaseMigrationFailed(_)
                | ChatError::DatabasePoolUnavailable(_)
        )
    }

    /// Rejected input; nothing was changed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyBody | ChatError::BodyTooLong { .. } | ChatError::ValidationError(_)
        )
    }

    /// Conflicts with current state; the caller may retry after re-reading it.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ChatError::DuplicateRoom { .. }
                | ChatError::AlreadyInactive(_)
                | ChatError::RoomInactive(_)
        )
    }

    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            ChatError::Forbidden(_) | ChatError::NotParticipant { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChatError::RoomNotFound(_)
                | ChatError::MessageNotFound(_)
                | ChatError::UnreadCounterNotFound { .. }
        )
    }

    pub fn is_notification_error(&self) -> bool {
        matches!(
            self,
            ChatError::NotificationRequestFailed(_)
                | ChatError::NotificationRejected { .. }
                | ChatError::NotificationTimeout(_)
                | ChatError::NotificationServiceUnavailable(_)
                | ChatError::DispatcherClosed
        )
    }

    /// Returns true if this error is transient and the operation might succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::DatabasePoolUnavailable(_)
            | ChatError::DatabaseConnectionFailed { .. }
            | ChatError::NotificationTimeout(_)
            | ChatError::NotificationServiceUnavailable(_)
            | ChatError::NotificationRequestFailed(_) => true,
            ChatError::NotificationRejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::DatabaseConnectionFailed { .. } => "E1001",
            ChatError::DatabaseQueryFailed(_) => "E1002",
            ChatError::DatabaseMigrationFailed(_) => "E1003",
            ChatError::DatabasePoolUnavailable(_) => "E1004",
            ChatError::ConfigParseError(_) => "E2002",
            ChatError::InvalidConfigValue { .. } => "E2003",
            ChatError::RoomNotFound(_) => "E3001",
            ChatError::DuplicateRoom { .. } => "E3002",
            ChatError::RoomInactive(_) => "E3003",
            ChatError::AlreadyInactive(_) => "E3004",
            ChatError::Forbidden(_) => "E3005",
            ChatError::NotParticipant { .. } => "E3006",
            ChatError::MessageNotFound(_) => "E4001",
            ChatError::EmptyBody => "E4002",
            ChatError::BodyTooLong { .. } => "E4003",
            ChatError::UnreadCounterNotFound { .. } => "E4004",
            ChatError::NotificationRequestFailed(_) => "E5001",
            ChatError::NotificationRejected { .. } => "E5002",
            ChatError::NotificationTimeout(_) => "E5003",
            ChatError::NotificationServiceUnavailable(_) => "E5004",
            ChatError::DispatcherClosed => "E5005",
            ChatError::Internal(_) => "E9001",
            ChatError::ValidationError(_) => "E9002",
            ChatError::IoError(_) => "E9003",
            ChatError::SerializationError(_) => "E9004",
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();

        if self.is_transient() {
            warn!(error_code = %code, "Transient error occurred: {}", self);
        } else {
            error!(error_code = %code, "Error occurred: {}", self);
        }
    }
}

// ============================================================================
// Retry utilities
// ============================================================================

/// Execute an async operation, retrying transient failures per `config`.
pub async fn retry_async_with_config<F, Fut, T>(operation: F, config: RetryConfig) -> ChatResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ChatResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt + 1 == config.max_attempts {
                    e.log();
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ChatError::Internal("Retry loop exhausted without error".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_display() {
        let err = ChatError::DuplicateRoom { trade_offer_id: 123 };
        assert!(err.to_string().contains("E3002"));
        assert!(err.to_string().contains("123"));

        let err = ChatError::NotParticipant {
            user_id: "user_abc".to_string(),
            room_id: Uuid::nil(),
        };
        assert!(err.to_string().contains("E3006"));
        assert!(err.to_string().contains("user_abc"));
    }

    #[test]
    fn test_error_categorization() {
        assert!(ChatError::EmptyBody.is_validation());
        assert!(ChatError::BodyTooLong { len: 6000, max: 5000 }.is_validation());

        assert!(ChatError::DuplicateRoom { trade_offer_id: 1 }.is_conflict());
        assert!(ChatError::AlreadyInactive(Uuid::nil()).is_conflict());

        assert!(ChatError::forbidden("sender cannot mark own message").is_authorization());
        assert!(!ChatError::forbidden("x").is_not_found());

        assert!(ChatError::room_not_found(7).is_not_found());
        assert!(ChatError::MessageNotFound(Uuid::nil()).is_not_found());

        assert!(ChatError::DatabaseQueryFailed("boom".to_string()).is_database_error());
        assert!(ChatError::DispatcherClosed.is_notification_error());
    }

    #[test]
    fn test_is_transient() {
        assert!(ChatError::DatabasePoolUnavailable("timeout".to_string()).is_transient());
        assert!(ChatError::database_connection_failed("refused").is_transient());
        assert!(ChatError::NotificationTimeout("5s".to_string()).is_transient());
        assert!(ChatError::NotificationRejected {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(ChatError::NotificationRejected {
            status: 429,
            body: String::new()
        }
        .is_transient());

        assert!(!ChatError::NotificationRejected {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!ChatError::EmptyBody.is_transient());
        assert!(!ChatError::RoomInactive(Uuid::nil()).is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ChatError::database_connection_failed("err").error_code(), "E1001");
        assert_eq!(ChatError::ConfigParseError("bad".to_string()).error_code(), "E2002");
        assert_eq!(ChatError::room_not_found("r").error_code(), "E3001");
        assert_eq!(ChatError::EmptyBody.error_code(), "E4002");
        assert_eq!(ChatError::DispatcherClosed.error_code(), "E5005");
        assert_eq!(ChatError::Internal("err".to_string()).error_code(), "E9001");
    }

    #[test]
    fn test_notification_retry_config() {
        let config = RetryConfig::for_notifications();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        // capped
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_delay_jitter_bounds() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        };

        let delay = config.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(1000));
        assert!(delay <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_retry_async_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        let result = retry_async_with_config(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ChatError::DatabasePoolUnavailable("busy".to_string()))
                } else {
                    Ok(42)
                }
            },
            config,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);

        let result: ChatResult<()> = retry_async_with_config(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::EmptyBody)
            },
            RetryConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(ChatError::EmptyBody)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let chat_err: ChatError = io_err.into();
        assert!(matches!(chat_err, ChatError::IoError(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let chat_err: ChatError = json_err.into();
        assert!(matches!(chat_err, ChatError::SerializationError(_)));
    }
}
