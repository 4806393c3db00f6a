//! `TaskStore` trait — single async interface for task records and event logs.
//!
//! The registry is constructed with an `Arc<dyn TaskStore>`, so a durable
//! backend can replace [`InMemoryTaskStore`](super::InMemoryTaskStore)
//! without touching the driver or the transport.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TaskError;
use crate::events::TaskEvent;
use crate::task::{TaskRecord, TaskUpdate};

/// Backend-agnostic storage for tasks and their event logs.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a freshly created task with an empty event log.
    async fn insert(&self, task: TaskRecord);

    /// Get a task by ID.
    async fn get(&self, id: Uuid) -> Option<TaskRecord>;

    /// Apply an update atomically, returning the updated record.
    ///
    /// Rejected updates leave the record untouched.
    async fn apply(&self, id: Uuid, update: TaskUpdate) -> Result<TaskRecord, TaskError>;

    /// Append to the task's log, assigning the event its sequence number.
    /// Returns `None` if the task does not exist.
    async fn append_event(&self, id: Uuid, event: TaskEvent) -> Option<TaskEvent>;

    /// The task's full event log in append order.
    async fn events(&self, id: Uuid) -> Option<Vec<TaskEvent>>;

    /// All tasks, oldest first.
    async fn list(&self) -> Vec<TaskRecord>;

    /// Remove a task and its log.
    async fn remove(&self, id: Uuid) -> Option<TaskRecord>;

    /// Remove every task.
    async fn clear(&self);
}
