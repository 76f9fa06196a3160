use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::error::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    pub messages: MessagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_min")]
    pub pool_min_connections: u32,

    #[serde(default = "default_pool_max")]
    pub pool_max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

/// Notification collaborator endpoint and the dispatcher's retry schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_notification_url")]
    pub base_url: String,

    #[serde(default = "default_notification_path")]
    pub endpoint_path: String,

    /// Per-request timeout; an expired request counts as a failed attempt.
    #[serde(default = "default_notification_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// How often the worker rescans the outbox for due tasks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long a claimed attempt keeps its outbox row away from other
    /// dispatchers. Must outlast `timeout_secs`.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_max_body_len")]
    pub max_body_len: usize,

    #[serde(default = "default_message_page")]
    pub default_page_size: u32,

    #[serde(default = "default_max_message_page")]
    pub max_page_size: u32,

    #[serde(default = "default_room_page")]
    pub default_room_page_size: u32,

    #[serde(default = "default_max_room_page")]
    pub max_room_page_size: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/swappo_chat".to_string()
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_notification_url() -> String {
    "http://notifications_service:8000".to_string()
}

fn default_notification_path() -> String {
    "/api/v1/notifications".to_string()
}

fn default_notification_timeout() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_in_flight() -> usize {
    32
}

fn default_poll_interval() -> u64 {
    30
}

fn default_lease() -> u64 {
    30
}

fn default_max_body_len() -> usize {
    5000
}

fn default_message_page() -> u32 {
    100
}

fn default_max_message_page() -> u32 {
    500
}

fn default_room_page() -> u32 {
    50
}

fn default_max_room_page() -> u32 {
    100
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_min_connections: default_pool_min(),
            pool_max_connections: default_pool_max(),
            pool_acquire_timeout_secs: default_acquire_timeout(),
            pool_idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_notification_url(),
            endpoint_path: default_notification_path(),
            timeout_secs: default_notification_timeout(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            queue_capacity: default_queue_capacity(),
            max_in_flight: default_max_in_flight(),
            poll_interval_secs: default_poll_interval(),
            lease_secs: default_lease(),
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_body_len: default_max_body_len(),
            default_page_size: default_message_page(),
            max_page_size: default_max_message_page(),
            default_room_page_size: default_room_page(),
            max_room_page_size: default_max_room_page(),
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Accepts a bare level or a comma-separated list of directives, in the form
/// `EnvFilter` reads from `RUST_LOG`. Within a list a directive may be a
/// level, `target=level`, or a bare target enabling everything under it.
fn is_valid_log_filter(filter: &str) -> bool {
    let is_level = |level: &str| LOG_LEVELS.contains(&level.trim().to_lowercase().as_str());
    let is_target = |target: &str| {
        target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '-')
    };

    let directives: Vec<&str> = filter
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .collect();
    !directives.is_empty()
        && directives
            .iter()
            .all(|&directive| match directive.rsplit_once('=') {
                Some((target, level)) => !target.trim().is_empty() && is_level(level),
                None => is_level(directive) || (directives.len() > 1 && is_target(directive)),
            })
}

impl NotificationConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }

    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint_path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl ChatConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SWAPPO_CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut chat_config: ChatConfig = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            chat_config.database.url = url;
        }

        if let Ok(url) = std::env::var("NOTIFICATION_SERVICE_URL") {
            chat_config.notifications.base_url = url;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            chat_config.logging.level = level;
        }

        chat_config.validate()?;

        Ok(chat_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.database.url.is_empty() {
            return Err(ConfigLoadError::MissingRequired("database.url".to_string()));
        }

        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(invalid(
                "database.url",
                "Must be a valid PostgreSQL URL starting with postgres:// or postgresql://",
            ));
        }

        if self.database.pool_min_connections > self.database.pool_max_connections {
            return Err(invalid(
                "database.pool_min_connections",
                "Cannot be greater than pool_max_connections",
            ));
        }

        let notifications = &self.notifications;
        if notifications.enabled && notifications.base_url.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "notifications.base_url".to_string(),
            ));
        }
        if notifications.max_attempts == 0 {
            return Err(invalid("notifications.max_attempts", "Must be at least 1"));
        }
        if notifications.timeout_secs == 0 {
            return Err(invalid("notifications.timeout_secs", "Must be greater than 0"));
        }
        if notifications.lease_secs <= notifications.timeout_secs {
            return Err(invalid(
                "notifications.lease_secs",
                "Must be greater than timeout_secs",
            ));
        }
        if notifications.initial_delay_ms > notifications.max_delay_ms {
            return Err(invalid(
                "notifications.initial_delay_ms",
                "Cannot be greater than max_delay_ms",
            ));
        }
        if notifications.backoff_multiplier < 1.0 {
            return Err(invalid(
                "notifications.backoff_multiplier",
                "Must be at least 1.0",
            ));
        }
        if notifications.queue_capacity == 0 || notifications.max_in_flight == 0 {
            return Err(invalid(
                "notifications.queue_capacity",
                "Queue capacity and max_in_flight must be greater than 0",
            ));
        }

        let messages = &self.messages;
        if messages.max_body_len == 0 {
            return Err(invalid("messages.max_body_len", "Must be greater than 0"));
        }
        if messages.default_page_size == 0
            || messages.default_page_size > messages.max_page_size
        {
            return Err(invalid(
                "messages.default_page_size",
                "Must be between 1 and max_page_size",
            ));
        }
        if messages.default_room_page_size == 0
            || messages.default_room_page_size > messages.max_room_page_size
        {
            return Err(invalid(
                "messages.default_room_page_size",
                "Must be between 1 and max_room_page_size",
            ));
        }

        if !is_valid_log_filter(&self.logging.level) {
            return Err(invalid(
                "logging.level",
                &format!(
                    "Invalid log level '{}'. Use one of {:?} or target=level directives",
                    self.logging.level, LOG_LEVELS
                ),
            ));
        }

        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }
}

fn invalid(key: &str, message: &str) -> ConfigLoadError {
    ConfigLoadError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("swappo-chat.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("swappo-chat").join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("swappo-chat").join(".env"));
    }

    for path in paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();

        assert_eq!(config.database.url, "postgres://localhost/swappo_chat");
        assert_eq!(config.database.pool_min_connections, 1);
        assert_eq!(config.database.pool_max_connections, 10);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.notifications.enabled);
        assert_eq!(config.notifications.max_attempts, 3);
        assert_eq!(config.notifications.timeout_secs, 5);
        assert_eq!(config.messages.max_body_len, 5000);
        assert_eq!(config.messages.default_page_size, 100);
        assert_eq!(config.messages.max_room_page_size, 100);
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(ChatConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_database_url() {
        let mut config = ChatConfig::default();
        config.database.url = "mysql://localhost/test".to_string();
        assert!(config.validate().is_err());

        config.database.url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigLoadError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_validation_invalid_pool_config() {
        let mut config = ChatConfig::default();
        config.database.pool_min_connections = 20;
        config.database.pool_max_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_notification_schedule() {
        let mut config = ChatConfig::default();
        config.notifications.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.notifications.initial_delay_ms = 20_000;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.notifications.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.notifications.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.notifications.lease_secs = config.notifications.timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_page_sizes() {
        let mut config = ChatConfig::default();
        config.messages.default_page_size = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = ChatConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "swappo_chat_core=debug,sqlx=warn".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "off".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "warn,swappo_chat_core=off".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "info,swappo_chat_core".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "sqlx=loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = " , ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_config_from_notifications() {
        let notifications = NotificationConfig::default();
        let retry = notifications.retry_config();

        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(10));
        assert_eq!(retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_endpoint_url_joins_slashes() {
        let mut notifications = NotificationConfig::default();
        notifications.base_url = "http://localhost:8000/".to_string();
        assert_eq!(
            notifications.endpoint_url(),
            "http://localhost:8000/api/v1/notifications"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swappo-chat.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[notifications]
max_attempts = 5
initial_delay_ms = 250

[messages]
max_body_len = 2000
"#
        )
        .unwrap();

        let config = ChatConfig::load_from_paths(vec![path]).unwrap();

        assert_eq!(config.notifications.max_attempts, 5);
        assert_eq!(config.notifications.initial_delay_ms, 250);
        assert_eq!(config.notifications.max_delay_ms, 10_000);
        assert_eq!(config.messages.max_body_len, 2000);
        assert_eq!(config.messages.default_page_size, 100);
    }
}
