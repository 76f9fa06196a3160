use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use swappo_chat_core::{
    ChatConfig, ChatError, ChatResult, ChatService, ChatStore, DispatchOutcome, MemoryChatStore,
    MessageStatus, NewMessage, NewRoom, NotificationSink, NotificationState, NotificationTask,
};
use tokio::sync::broadcast;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALICE: &str = "user_abc123";
const BOB: &str = "user_xyz789";

/// Fails the first `failures` calls, then succeeds.
struct ScriptedSink {
    failures: u32,
    calls: AtomicU32,
    recipients: std::sync::Mutex<Vec<String>>,
}

impl ScriptedSink {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            recipients: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for ScriptedSink {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn deliver(&self, task: &NotificationTask) -> ChatResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.recipients
            .lock()
            .unwrap()
            .push(task.recipient_id.clone());
        if call <= self.failures {
            Err(ChatError::NotificationRejected {
                status: 503,
                body: "unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn config(initial_delay_ms: u64) -> ChatConfig {
    let mut config = ChatConfig::default();
    config.notifications.initial_delay_ms = initial_delay_ms;
    config.notifications.max_delay_ms = initial_delay_ms * 4;
    config.notifications.jitter = false;
    config.notifications.poll_interval_secs = 0;
    config
}

async fn next_outcome(outcomes: &mut broadcast::Receiver<DispatchOutcome>) -> DispatchOutcome {
    tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .expect("timed out waiting for dispatch outcome")
        .unwrap()
}

async fn setup(
    sink: Arc<ScriptedSink>,
    initial_delay_ms: u64,
) -> (ChatService, Arc<MemoryChatStore>, Uuid) {
    let store = Arc::new(MemoryChatStore::new());
    let service = ChatService::new(&config(initial_delay_ms), store.clone(), sink);
    let room = service
        .create_room(&NewRoom::new(42, ALICE, BOB))
        .await
        .unwrap();
    (service, store, room.id)
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_fails_twice_then_delivers() {
        let sink = ScriptedSink::failing(2);
        let (service, store, room_id) = setup(sink.clone(), 10).await;
        let mut outcomes = service.dispatcher().subscribe();
        service.start().await.unwrap();

        let message = service
            .send_message(&NewMessage::new(room_id, ALICE, "still available?"))
            .await
            .unwrap();
        let outcome = next_outcome(&mut outcomes).await;

        assert_eq!(outcome.state, NotificationState::Delivered);
        assert_eq!(outcome.message_id, message.id);
        assert_eq!(outcome.recipient_id, BOB);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sink.calls(), 3);
        assert_eq!(*sink.recipients.lock().unwrap(), vec![BOB; 3]);

        let stored = service.get_message(message.id).await.unwrap();
        assert_eq!(stored, message);
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);

        let stats = service.dispatcher_stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.attempts, 3);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_after_send_already_returned() {
        let sink = ScriptedSink::failing(u32::MAX);
        let (service, store, room_id) = setup(sink.clone(), 10).await;
        let mut outcomes = service.dispatcher().subscribe();

        let message = service
            .send_message(&NewMessage::new(room_id, ALICE, "hello"))
            .await
            .unwrap();
        assert_eq!(sink.calls(), 0);
        assert_eq!(store.pending_notifications().await.unwrap(), 1);

        service.start().await.unwrap();
        let outcome = next_outcome(&mut outcomes).await;

        assert_eq!(outcome.state, NotificationState::Exhausted);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.last_error.unwrap().contains("503"));
        assert_eq!(sink.calls(), 3);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);
        assert_eq!(
            service.get_message(message.id).await.unwrap().status,
            MessageStatus::Sent
        );

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_only_recipient_is_notified() {
        let sink = ScriptedSink::failing(0);
        let (service, _store, room_id) = setup(sink.clone(), 10).await;
        let mut outcomes = service.dispatcher().subscribe();
        service.start().await.unwrap();

        service
            .send_message(&NewMessage::new(room_id, BOB, "reply"))
            .await
            .unwrap();
        let outcome = next_outcome(&mut outcomes).await;

        assert_eq!(outcome.recipient_id, ALICE);
        assert_eq!(*sink.recipients.lock().unwrap(), vec![ALICE.to_string()]);

        service.shutdown().await;
    }
}

mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn test_deactivation_stops_retries() {
        let sink = ScriptedSink::failing(u32::MAX);
        let (service, store, room_id) = setup(sink.clone(), 300).await;
        let mut outcomes = service.dispatcher().subscribe();
        service.start().await.unwrap();

        service
            .send_message(&NewMessage::new(room_id, ALICE, "hello"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let deactivation = service.deactivate_room(room_id, BOB).await.unwrap();
        assert_eq!(deactivation.cancelled_notifications, 1);

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.state, NotificationState::Cancelled);
        assert_eq!(sink.calls(), 1);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);
        assert_eq!(service.dispatcher_stats().cancelled, 1);

        service.shutdown().await;
    }
}

mod recovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_recovers_outbox() {
        let store = Arc::new(MemoryChatStore::new());
        let room = store
            .create_room(&NewRoom::new(9, ALICE, BOB))
            .await
            .unwrap();
        let appended = store
            .append_message(&NewMessage::new(room.id, ALICE, "sent before a restart"))
            .await
            .unwrap();

        let sink = ScriptedSink::failing(0);
        let service = ChatService::new(&config(10), store.clone(), sink.clone());
        let mut outcomes = service.dispatcher().subscribe();
        service.start().await.unwrap();

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.task_id, appended.notification.id);
        assert_eq!(outcome.state, NotificationState::Delivered);
        assert_eq!(sink.calls(), 1);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);

        service.shutdown().await;
    }
}

mod shared_store_tests {
    use super::*;

    /// Succeeds after `delay`, counting calls.
    struct SlowSink {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn deliver(&self, _task: &NotificationTask) -> ChatResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_two_dispatchers_deliver_once() {
        let store = Arc::new(MemoryChatStore::new());
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(1500),
            calls: AtomicU32::new(0),
        });

        let api = ChatService::new(&config(10), store.clone(), sink.clone());
        let mut worker_config = config(10);
        worker_config.notifications.poll_interval_secs = 1;
        let worker = ChatService::new(&worker_config, store.clone(), sink.clone());
        api.start().await.unwrap();
        worker.start().await.unwrap();

        let room = api
            .create_room(&NewRoom::new(77, ALICE, BOB))
            .await
            .unwrap();
        api.send_message(&NewMessage::new(room.id, ALICE, "is it still there?"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while api.dispatcher_stats().delivered + worker.dispatcher_stats().delivered == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("notification was never delivered");

        // Let the worker poll the outbox again.
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        let delivered = api.dispatcher_stats().delivered + worker.dispatcher_stats().delivered;
        assert_eq!(delivered, 1);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);

        worker.shutdown().await;
        api.shutdown().await;
    }
}

mod http_tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/notifications"))
            .and(body_partial_json(serde_json::json!({
                "user_id": BOB,
                "type": "new_message",
                "related_user_id": ALICE,
                "body": "Is the bike still available?"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(10);
        config.notifications.base_url = server.uri();
        let store = Arc::new(MemoryChatStore::new());
        let service = ChatService::with_store(&config, store).unwrap();
        let mut outcomes = service.dispatcher().subscribe();
        service.start().await.unwrap();

        let room = service
            .create_room(&NewRoom::new(1, ALICE, BOB))
            .await
            .unwrap();
        service
            .send_message(&NewMessage::new(
                room.id,
                ALICE,
                "Is the bike still available?",
            ))
            .await
            .unwrap();

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.state, NotificationState::Delivered);
        assert_eq!(outcome.attempts, 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_notifications_use_noop_sink() {
        let mut config = config(10);
        config.notifications.enabled = false;
        let service = ChatService::with_store(&config, Arc::new(MemoryChatStore::new())).unwrap();

        assert_eq!(service.dispatcher().sink_name(), "noop");
    }
}
