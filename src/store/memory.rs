//! In-memory `TaskStore`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::TaskStore;
use crate::error::TaskError;
use crate::events::TaskEvent;
use crate::task::{TaskRecord, TaskUpdate};

struct Entry {
    record: TaskRecord,
    events: Vec<TaskEvent>,
}

/// Process-local task store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: TaskRecord) {
        self.tasks.write().await.insert(
            task.id,
            Entry {
                record: task,
                events: Vec::new(),
            },
        );
    }

    async fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.read().await.get(&id).map(|e| e.record.clone())
    }

    async fn apply(&self, id: Uuid, update: TaskUpdate) -> Result<TaskRecord, TaskError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&id).ok_or(TaskError::NotFound { id })?;

        // Work on a copy so a rejected update cannot leave partial changes.
        let mut record = entry.record.clone();
        record.apply(update)?;
        entry.record = record.clone();
        Ok(record)
    }

    async fn append_event(&self, id: Uuid, mut event: TaskEvent) -> Option<TaskEvent> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&id)?;
        event.seq = entry.events.len() as u64;
        entry.events.push(event.clone());
        Some(event)
    }

    async fn events(&self, id: Uuid) -> Option<Vec<TaskEvent>> {
        self.tasks.read().await.get(&id).map(|e| e.events.clone())
    }

    async fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    async fn remove(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.write().await.remove(&id).map(|e| e.record)
    }

    async fn clear(&self) {
        self.tasks.write().await.clear();
    }
}
