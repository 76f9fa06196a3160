//! Delivery of notification tasks to the notifications service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::NotificationTask;

const NOTIFICATION_TYPE: &str = "new_message";
const NOTIFICATION_TITLE: &str = "New Message";

/// JSON body accepted by the notifications service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    pub related_user_id: String,
    pub chat_room_id: Uuid,
    pub message_id: Uuid,
}

impl From<&NotificationTask> for NotificationPayload {
    fn from(task: &NotificationTask) -> Self {
        Self {
            user_id: task.recipient_id.clone(),
            kind: NOTIFICATION_TYPE.to_string(),
            title: NOTIFICATION_TITLE.to_string(),
            body: task.preview.clone(),
            related_user_id: task.sender_id.clone(),
            chat_room_id: task.chat_room_id,
            message_id: task.message_id,
        }
    }
}

/// One delivery attempt. Any error counts as a failed attempt; retry policy
/// belongs to the dispatcher.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, task: &NotificationTask) -> ChatResult<()>;
}

pub struct HttpNotificationClient {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationClient {
    pub fn new(config: &NotificationConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                ChatError::NotificationRequestFailed(format!(
                    "Failed to create HTTP client: {}",
                    e
                ))
            })?;

        Ok(Self {
            client,
            url: config.endpoint_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, task: &NotificationTask) -> ChatResult<()> {
        let payload = NotificationPayload::from(task);
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if status.is_success() {
            debug!(task_id = %task.id, status = status.as_u16(), "Notification accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ChatError::NotificationRejected {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}

/// Accepts every task without doing anything. Used when notifications are
/// disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn deliver(&self, task: &NotificationTask) -> ChatResult<()> {
        debug!(task_id = %task.id, "Notifications disabled, dropping task");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task() -> NotificationTask {
        let message = Message::new(
            Uuid::new_v4(),
            1,
            "alice".to_string(),
            "Is the bike still available?".to_string(),
        );
        NotificationTask::for_message(&message, "bob")
    }

    fn config_for(server: &MockServer) -> NotificationConfig {
        NotificationConfig {
            base_url: server.uri(),
            timeout_secs: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_shape() {
        let task = task();
        let json = serde_json::to_value(NotificationPayload::from(&task)).unwrap();

        assert_eq!(json["user_id"], "bob");
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["related_user_id"], "alice");
        assert_eq!(json["body"], "Is the bike still available?");
        assert_eq!(json["message_id"], task.message_id.to_string());
    }

    #[tokio::test]
    async fn test_deliver_success_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/notifications"))
            .and(body_partial_json(serde_json::json!({
                "user_id": "bob",
                "type": "new_message"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpNotificationClient::new(&config_for(&server)).unwrap();
        client.deliver(&task()).await.unwrap();
    }

    #[tokio::test]
    async fn test_deliver_rejected_on_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/notifications"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = HttpNotificationClient::new(&config_for(&server)).unwrap();
        let err = client.deliver(&task()).await.unwrap_err();

        assert!(matches!(
            err,
            ChatError::NotificationRejected { status: 503, .. }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_deliver_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(std::time::Duration::from_secs(3)))
            .mount(&server)
            .await;

        let client = HttpNotificationClient::new(&config_for(&server)).unwrap();
        let err = client.deliver(&task()).await.unwrap_err();
        assert!(matches!(err, ChatError::NotificationTimeout(_)));
    }
}
