//! Task registry — authoritative task state, event logs, and observers.
//!
//! Every mutation of a task runs while holding that task's observer-set
//! mutex: the store update, the resulting log append, and the delivery to
//! observers happen as one step. Attaching an observer takes the same mutex
//! to replay the log, so replay followed by live delivery never skips or
//! repeats an event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, ObserverSet, Subscription};
use crate::error::TaskError;
use crate::events::{ErrorReason, EventKind, StreamMessage, TaskEvent};
use crate::store::{InMemoryTaskStore, TaskStore};
use crate::task::{
    PendingQuestion, TaskConfig, TaskOutcome, TaskRecord, TaskStatus, TaskUpdate,
};

pub struct TaskRegistry {
    store: Arc<dyn TaskStore>,
    broadcaster: Arc<Broadcaster>,
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn TaskStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Registry backed by an [`InMemoryTaskStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTaskStore::new()), Broadcaster::new())
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Create a task in `pending` with an empty log and no observers.
    pub async fn create(&self, description: impl Into<String>, config: TaskConfig) -> Uuid {
        let record = TaskRecord::new(description, config);
        let id = record.id;

        self.broadcaster.open_channel(id).await;
        self.tokens.write().await.insert(id, CancellationToken::new());
        self.store.insert(record).await;

        info!(task_id = %id, "Task created");
        id
    }

    pub async fn get(&self, id: Uuid) -> Result<TaskRecord, TaskError> {
        self.store.get(id).await.ok_or(TaskError::NotFound { id })
    }

    pub async fn events(&self, id: Uuid) -> Result<Vec<TaskEvent>, TaskError> {
        self.store.events(id).await.ok_or(TaskError::NotFound { id })
    }

    pub async fn cancellation_token(&self, id: Uuid) -> Option<CancellationToken> {
        self.tokens.read().await.get(&id).cloned()
    }

    /// Move a task along the state machine and emit a `status` event.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.update(id, TaskUpdate::Status { to: status, message }, None, None)
            .await
    }

    /// Store the result and move the task to `completed`, emitting the
    /// `completed` event just before the terminal `status`. If the task
    /// already finished, neither event is logged.
    pub async fn set_result(&self, id: Uuid, result: String) -> Result<TaskRecord, TaskError> {
        let event = EventKind::Completed {
            result: result.clone(),
        };
        self.update(
            id,
            TaskUpdate::Finish(TaskOutcome::Completed { result }),
            Some(event),
            None,
        )
        .await
    }

    /// Store the error and move the task to `error`, emitting an `error`
    /// event with `reason` just before the terminal `status`.
    pub async fn set_error(
        &self,
        id: Uuid,
        error: String,
        reason: ErrorReason,
    ) -> Result<TaskRecord, TaskError> {
        let event = EventKind::Error {
            error: error.clone(),
            reason,
        };
        self.update(
            id,
            TaskUpdate::Finish(TaskOutcome::Failed { error }),
            Some(event),
            None,
        )
        .await
    }

    /// Move the task to `waiting_for_answer` and emit the `question` event.
    pub async fn await_answer(
        &self,
        id: Uuid,
        question: PendingQuestion,
    ) -> Result<TaskRecord, TaskError> {
        let event = EventKind::Question {
            question_id: question.question_id,
            question: question.question.clone(),
            context: question.context.clone(),
        };
        self.update(id, TaskUpdate::AwaitAnswer(question), None, Some(event))
            .await
    }

    /// Cancel a task: transition to `cancelled`, close its observers and
    /// trip its cancellation token. Fails if the task is already terminal.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<TaskRecord, TaskError> {
        let record = self
            .update(
                id,
                TaskUpdate::Finish(TaskOutcome::Cancelled { reason }),
                None,
                None,
            )
            .await?;
        info!(task_id = %id, "Task cancelled");
        Ok(record)
    }

    /// Append an event to the log and deliver it.
    ///
    /// Returns `false` without error when the task is gone or already
    /// terminal; a racing worker's late events are simply dropped.
    pub async fn append(&self, id: Uuid, kind: EventKind) -> bool {
        let Some(channel) = self.broadcaster.channel(id).await else {
            debug!(task_id = %id, event = kind.name(), "Dropping event for unknown task");
            return false;
        };
        let mut observers = channel.lock().await;

        match self.store.get(id).await {
            Some(record) if record.status.is_active() => {
                self.emit(&mut observers, id, kind).await.is_some()
            }
            Some(record) => {
                debug!(
                    task_id = %id,
                    status = %record.status,
                    event = kind.name(),
                    "Dropping late event for finished task"
                );
                false
            }
            None => false,
        }
    }

    /// Attach a new observer. The task's log (after `after_seq`, if given) is
    /// replayed to it before any live event. Observers of a finished task get
    /// the replay and then their stream ends.
    pub async fn register_observer(
        &self,
        id: Uuid,
        after_seq: Option<u64>,
    ) -> Result<Subscription, TaskError> {
        let channel = self
            .broadcaster
            .channel(id)
            .await
            .ok_or(TaskError::NotFound { id })?;
        let mut observers = channel.lock().await;

        let record = self.get(id).await?;
        let events = self.events(id).await?;

        let (observer, subscription) = self.broadcaster.observer(id);
        let mut replayed = 0;
        for event in events
            .into_iter()
            .filter(|e| after_seq.is_none_or(|after| e.seq > after))
        {
            if !observer.send(StreamMessage::Event(event)) {
                break;
            }
            replayed += 1;
        }

        if record.status.is_active() {
            observers.attach(observer);
        }
        debug!(
            task_id = %id,
            observer_id = %subscription.observer_id(),
            replayed,
            live = record.status.is_active(),
            "Observer registered"
        );
        Ok(subscription)
    }

    pub async fn list_all(&self) -> Vec<TaskRecord> {
        self.store.list().await
    }

    pub async fn list_active(&self) -> Vec<TaskRecord> {
        self.store
            .list()
            .await
            .into_iter()
            .filter(|t| t.status.is_active())
            .collect()
    }

    /// Remove a task, closing any observers still attached.
    pub async fn evict(&self, id: Uuid) -> Option<TaskRecord> {
        let closed = self.broadcaster.remove(id).await;
        self.tokens.write().await.remove(&id);
        let removed = self.store.remove(id).await;
        if removed.is_some() {
            debug!(task_id = %id, closed_observers = closed, "Task evicted");
        }
        removed
    }

    /// Evict terminal tasks that finished more than `retention` ago.
    /// Returns the number evicted.
    pub async fn evict_expired(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(retention);

        let expired: Vec<Uuid> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|t| t.status.is_terminal())
            .filter(|t| match (t.completed_at, cutoff) {
                (Some(done), Some(cutoff)) => done <= cutoff,
                _ => false,
            })
            .map(|t| t.id)
            .collect();

        let mut evicted = 0;
        for id in expired {
            if self.evict(id).await.is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop every task, closing all observers.
    pub async fn clear(&self) {
        let closed = self.broadcaster.clear().await;
        self.tokens.write().await.clear();
        self.store.clear().await;
        debug!(closed_observers = closed, "Registry cleared");
    }

    /// Apply an update under the task's observer lock, then emit `lead`,
    /// the `status` event and `follow_up`, in that order. Nothing is emitted
    /// when the update is rejected. Terminal transitions close the observers
    /// and trip the cancellation token.
    async fn update(
        &self,
        id: Uuid,
        update: TaskUpdate,
        lead: Option<EventKind>,
        follow_up: Option<EventKind>,
    ) -> Result<TaskRecord, TaskError> {
        let channel = self
            .broadcaster
            .channel(id)
            .await
            .ok_or(TaskError::NotFound { id })?;
        let mut observers = channel.lock().await;

        let message = match &update {
            TaskUpdate::Status { message, .. } => message.clone(),
            TaskUpdate::AwaitAnswer(_) => None,
            TaskUpdate::Finish(TaskOutcome::Completed { .. }) => None,
            TaskUpdate::Finish(TaskOutcome::Failed { error }) => Some(error.clone()),
            TaskUpdate::Finish(TaskOutcome::Cancelled { reason }) => reason.clone(),
        };

        let record = self.store.apply(id, update).await.inspect_err(|e| {
            warn!(task_id = %id, error = %e, "Rejected task update");
        })?;

        if let Some(kind) = lead {
            self.emit(&mut observers, id, kind).await;
        }
        self.emit(
            &mut observers,
            id,
            EventKind::Status {
                status: record.status,
                message,
            },
        )
        .await;
        if let Some(kind) = follow_up {
            self.emit(&mut observers, id, kind).await;
        }

        if record.status.is_terminal() {
            let closed = observers.close();
            if let Some(token) = self.tokens.read().await.get(&id) {
                token.cancel();
            }
            info!(
                task_id = %id,
                status = %record.status,
                closed_observers = closed,
                "Task finished"
            );
        } else {
            debug!(task_id = %id, status = %record.status, "Task status changed");
        }

        Ok(record)
    }

    /// Log and deliver one event. The caller holds the task's observer lock.
    async fn emit(
        &self,
        observers: &mut ObserverSet,
        id: Uuid,
        kind: EventKind,
    ) -> Option<TaskEvent> {
        let event = self.store.append_event(id, TaskEvent::new(id, kind)).await?;
        let pruned = observers.deliver(&StreamMessage::Event(event.clone()));
        if pruned > 0 {
            debug!(task_id = %id, pruned, "Pruned observers during delivery");
        }
        Some(event)
    }
}
