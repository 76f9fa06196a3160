use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sink::NotificationSink;
use crate::config::NotificationConfig;
use crate::error::{ChatError, ChatResult, RetryConfig};
use crate::models::{DispatchOutcome, NotificationState, NotificationTask};
use crate::repo::ChatStore;

const OUTCOME_CHANNEL_CAPACITY: usize = 256;
const RECOVERY_BATCH: usize = 500;

#[derive(Debug, Default)]
struct DispatcherStats {
    enqueued: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherSnapshot {
    pub enqueued: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub retried: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    pub in_progress: u64,
}

impl DispatcherStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, in_progress: usize) -> DispatcherSnapshot {
        DispatcherSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            in_progress: in_progress as u64,
        }
    }
}

struct DispatcherInner {
    store: Arc<dyn ChatStore>,
    sink: Arc<dyn NotificationSink>,
    retry: RetryConfig,
    lease: chrono::Duration,
    permits: Semaphore,
    stats: DispatcherStats,
    outcomes: broadcast::Sender<DispatchOutcome>,
    in_progress: std::sync::Mutex<HashSet<Uuid>>,
}

impl DispatcherInner {
    /// Claims the task for this process. False when it is already being worked.
    fn claim(&self, task_id: Uuid) -> bool {
        match self.in_progress.lock() {
            Ok(mut set) => set.insert(task_id),
            Err(_) => false,
        }
    }

    fn release(&self, task_id: Uuid) {
        if let Ok(mut set) = self.in_progress.lock() {
            set.remove(&task_id);
        }
    }

    fn in_progress_count(&self) -> usize {
        self.in_progress.lock().map(|set| set.len()).unwrap_or(0)
    }

    async fn run_task(self: Arc<Self>, mut task: NotificationTask) {
        loop {
            let wait = (task.next_attempt_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            if !self.room_active(&task).await {
                self.finish(task, NotificationState::Cancelled).await;
                return;
            }

            let now = Utc::now();
            task = match self
                .store
                .claim_notification(task.id, now, now + self.lease)
                .await
            {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    self.abandon(task).await;
                    return;
                }
                Err(e) => {
                    let delay = self.retry.delay_for_attempt(task.attempts.max(0) as u32);
                    warn!(task_id = %task.id, "Could not claim notification task: {}", e);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            // A previous holder spent the last attempt and stopped before finishing.
            if task.attempts as u32 > self.retry.max_attempts {
                task.attempts -= 1;
                self.finish(task, NotificationState::Exhausted).await;
                return;
            }
            DispatcherStats::bump(&self.stats.attempts);

            let result = match self.permits.acquire().await {
                Ok(_permit) => self.sink.deliver(&task).await,
                Err(_) => Err(ChatError::DispatcherClosed),
            };

            let e = match result {
                Ok(()) => {
                    self.finish(task, NotificationState::Delivered).await;
                    return;
                }
                Err(e) => e,
            };

            task.last_error = Some(e.to_string());
            if task.attempts as u32 >= self.retry.max_attempts {
                self.finish(task, NotificationState::Exhausted).await;
                return;
            }

            let delay = self.retry.delay_for_attempt(task.attempts as u32 - 1);
            if !transition(&mut task, NotificationState::Retrying) {
                self.release(task.id);
                return;
            }
            task.next_attempt_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            DispatcherStats::bump(&self.stats.retried);
            warn!(
                task_id = %task.id,
                attempt = task.attempts,
                delay_ms = delay.as_millis() as u64,
                "Notification attempt failed, retrying: {}",
                e
            );
            if !self.persist(&task).await {
                self.abandon(task).await;
                return;
            }
        }
    }

    /// Store errors count as active; the claim decides.
    async fn room_active(&self, task: &NotificationTask) -> bool {
        match self.store.room_is_active(task.chat_room_id).await {
            Ok(active) => active.unwrap_or(false),
            Err(e) => {
                warn!(task_id = %task.id, "Could not check room state: {}", e);
                true
            }
        }
    }

    /// The row was removed or claimed elsewhere. Removal means the room was
    /// deactivated; otherwise another dispatcher holds the task.
    async fn abandon(&self, task: NotificationTask) {
        if !self.room_active(&task).await {
            self.finish(task, NotificationState::Cancelled).await;
            return;
        }
        debug!(task_id = %task.id, "Notification task held by another dispatcher");
        self.release(task.id);
    }

    /// Writes the retry schedule to the outbox. False when this attempt no
    /// longer owns the row.
    async fn persist(&self, task: &NotificationTask) -> bool {
        match self.store.record_notification_attempt(task).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(task_id = %task.id, "Failed to record notification attempt: {}", e);
                true
            }
        }
    }

    async fn finish(&self, mut task: NotificationTask, state: NotificationState) {
        if !transition(&mut task, state) {
            self.release(task.id);
            return;
        }
        if let Err(e) = self.store.remove_notification(task.id).await {
            warn!(task_id = %task.id, "Failed to remove finished notification: {}", e);
        }
        self.release(task.id);

        match state {
            NotificationState::Delivered => {
                DispatcherStats::bump(&self.stats.delivered);
                info!(
                    task_id = %task.id,
                    message_id = %task.message_id,
                    attempts = task.attempts,
                    "Notification delivered"
                );
            }
            NotificationState::Exhausted => {
                DispatcherStats::bump(&self.stats.exhausted);
                error!(
                    task_id = %task.id,
                    message_id = %task.message_id,
                    recipient_id = %task.recipient_id,
                    attempts = task.attempts,
                    last_error = task.last_error.as_deref().unwrap_or("unknown"),
                    "Notification retries exhausted"
                );
            }
            _ => {
                DispatcherStats::bump(&self.stats.cancelled);
                info!(
                    task_id = %task.id,
                    room_id = %task.chat_room_id,
                    "Notification cancelled, room inactive"
                );
            }
        }

        let _ = self.outcomes.send(DispatchOutcome {
            task_id: task.id,
            message_id: task.message_id,
            chat_room_id: task.chat_room_id,
            recipient_id: task.recipient_id,
            state,
            attempts: task.attempts.max(0) as u32,
            last_error: task.last_error,
        });
    }
}

fn transition(task: &mut NotificationTask, next: NotificationState) -> bool {
    if !task.state.can_transition_to(next) {
        error!(
            task_id = %task.id,
            from = %task.state,
            to = %next,
            "Invalid notification state transition"
        );
        return false;
    }
    task.state = next;
    true
}

/// Delivers outbox tasks out of band.
///
/// Each task runs on its own tokio task and walks
/// `Pending -> InFlight -> {Delivered | Retrying -> InFlight | Exhausted}`.
/// Concurrent sink calls are bounded by `max_in_flight`. Before every attempt
/// the owning room is checked; once it is inactive no further attempt is made.
/// Every attempt starts by claiming the outbox row under a lease, so
/// dispatchers sharing a store never run the same attempt twice. The outbox
/// row is removed on any terminal state.
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
    sender: mpsc::Sender<NotificationTask>,
    receiver: Mutex<Option<mpsc::Receiver<NotificationTask>>>,
    poll_interval: Option<Duration>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn ChatStore>,
        sink: Arc<dyn NotificationSink>,
        config: &NotificationConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(DispatcherInner {
                store,
                sink,
                retry: config.retry_config(),
                lease: chrono::Duration::from_std(config.lease())
                    .unwrap_or_else(|_| chrono::Duration::seconds(30)),
                permits: Semaphore::new(config.max_in_flight.max(1)),
                stats: DispatcherStats::default(),
                outcomes,
                in_progress: std::sync::Mutex::new(HashSet::new()),
            }),
            sender,
            receiver: Mutex::new(Some(receiver)),
            poll_interval: (config.poll_interval_secs > 0)
                .then(|| Duration::from_secs(config.poll_interval_secs)),
            shutdown_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn sink_name(&self) -> &str {
        self.inner.sink.name()
    }

    /// Hands a freshly committed task to the dispatcher. A full queue is not an
    /// error: the row stays in the outbox and the next poll picks it up.
    pub fn enqueue(&self, task: NotificationTask) -> ChatResult<()> {
        match self.sender.try_send(task) {
            Ok(()) => {
                DispatcherStats::bump(&self.inner.stats.enqueued);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task_id = %task.id, "Notification queue full, leaving task in outbox");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChatError::DispatcherClosed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.inner.outcomes.subscribe()
    }

    pub fn stats(&self) -> DispatcherSnapshot {
        self.inner.stats.snapshot(self.inner.in_progress_count())
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Recovers due outbox rows, then serves the queue until `shutdown`.
    pub async fn start(&self) -> ChatResult<()> {
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| ChatError::Internal("Dispatcher already started".to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let inner = self.inner.clone();
        let poll_interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            run_loop(inner, receiver, shutdown_rx, poll_interval).await;
        });
        *self.worker.lock().await = Some(handle);

        info!(
            sink = self.inner.sink.name(),
            max_attempts = self.inner.retry.max_attempts,
            "Notification dispatcher started"
        );
        Ok(())
    }

    /// Stops the loop and aborts pending tasks. Their outbox rows remain and
    /// are recovered on the next start.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher loop ended abnormally: {}", e);
            }
        }
    }
}

async fn recover_due(inner: &Arc<DispatcherInner>, tasks: &mut JoinSet<()>) {
    match inner.store.due_notifications(Utc::now(), RECOVERY_BATCH).await {
        Ok(due) => {
            let mut spawned = 0usize;
            for task in due {
                if spawn_task(inner, tasks, task) {
                    spawned += 1;
                }
            }
            if spawned > 0 {
                info!(count = spawned, "Recovered notification tasks from outbox");
            }
        }
        Err(e) => warn!("Failed to read notification outbox: {}", e),
    }
}

fn spawn_task(
    inner: &Arc<DispatcherInner>,
    tasks: &mut JoinSet<()>,
    task: NotificationTask,
) -> bool {
    if !inner.claim(task.id) {
        debug!(task_id = %task.id, "Notification task already in progress");
        return false;
    }
    tasks.spawn(inner.clone().run_task(task));
    true
}

async fn run_loop(
    inner: Arc<DispatcherInner>,
    mut receiver: mpsc::Receiver<NotificationTask>,
    mut shutdown_rx: oneshot::Receiver<()>,
    poll_interval: Option<Duration>,
) {
    let mut tasks = JoinSet::new();
    let mut ticker = poll_interval.map(interval);

    recover_due(&inner, &mut tasks).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!(pending = tasks.len(), "Notification dispatcher shutting down");
                break;
            }
            received = receiver.recv() => match received {
                Some(task) => {
                    spawn_task(&inner, &mut tasks, task);
                }
                None => break,
            },
            _ = async {
                match ticker.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                recover_due(&inner, &mut tasks).await;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Notification task panicked: {}", e);
                    }
                }
            }
        }
    }

    tasks.shutdown().await;
    if let Ok(mut set) = inner.in_progress.lock() {
        set.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMessage, NewRoom};
    use crate::repo::MemoryChatStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FailingSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _task: &NotificationTask) -> ChatResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::NotificationServiceUnavailable("down".to_string()))
        }
    }

    fn fast_config() -> NotificationConfig {
        NotificationConfig {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            jitter: false,
            poll_interval_secs: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let store = Arc::new(MemoryChatStore::new());
        let room = store
            .create_room(&NewRoom::new(7, "alice", "bob"))
            .await
            .unwrap();
        let appended = store
            .append_message(&NewMessage::new(room.id, "alice", "hello"))
            .await
            .unwrap();

        let sink = Arc::new(FailingSink {
            calls: AtomicU32::new(0),
        });
        let dispatcher = NotificationDispatcher::new(store.clone(), sink.clone(), &fast_config());
        let mut outcomes = dispatcher.subscribe();
        dispatcher.start().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.message_id, appended.message.id);
        assert_eq!(outcome.state, NotificationState::Exhausted);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.pending_notifications().await.unwrap(), 0);

        let stats = dispatcher.stats();
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.retried, 2);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_task_for_active_room_is_dropped_quietly() {
        let store = Arc::new(MemoryChatStore::new());
        let room = store
            .create_room(&NewRoom::new(8, "alice", "bob"))
            .await
            .unwrap();
        let appended = store
            .append_message(&NewMessage::new(room.id, "alice", "hello"))
            .await
            .unwrap();
        // Another dispatcher already finished it.
        assert!(store
            .remove_notification(appended.notification.id)
            .await
            .unwrap());

        let sink = Arc::new(FailingSink {
            calls: AtomicU32::new(0),
        });
        let dispatcher = NotificationDispatcher::new(store.clone(), sink.clone(), &fast_config());
        let mut outcomes = dispatcher.subscribe();
        dispatcher.enqueue(appended.notification).unwrap();
        dispatcher.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(outcomes.try_recv().is_err());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        let stats = dispatcher.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.attempts, 0);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.in_progress, 0);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let store = Arc::new(MemoryChatStore::new());
        let dispatcher = NotificationDispatcher::new(
            store,
            Arc::new(super::super::sink::NoopNotificationSink),
            &fast_config(),
        );
        dispatcher.start().await.unwrap();
        assert!(dispatcher.is_running().await);
        assert!(dispatcher.start().await.is_err());
        dispatcher.shutdown().await;
        assert!(!dispatcher.is_running().await);
    }
}
