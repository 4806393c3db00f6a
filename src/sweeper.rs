//! Lifecycle sweeper — evicts finished tasks after the retention window and
//! cancels everything still active on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::registry::TaskRegistry;

pub struct Sweeper {
    registry: Arc<TaskRegistry>,
    retention: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<TaskRegistry>, retention: Duration, interval: Duration) -> Self {
        Self {
            registry,
            retention,
            interval,
        }
    }

    pub fn from_config(registry: Arc<TaskRegistry>, config: &RelayConfig) -> Self {
        Self::new(registry, config.retention, config.sweep_interval)
    }

    /// Evict terminal tasks older than the retention window.
    /// Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let evicted = self.registry.evict_expired(self.retention).await;
        if evicted > 0 {
            info!(count = evicted, "Evicted expired tasks");
        }
        evicted
    }

    /// Cancel every active task, close all observers and clear the registry.
    /// Returns the number of tasks cancelled.
    ///
    /// Cancellation is fire-and-forget: drivers notice their token on their
    /// own and find nothing left to update.
    pub async fn shutdown(&self) -> usize {
        let active = self.registry.list_active().await;
        let mut cancelled = 0;
        for task in active {
            match self
                .registry
                .cancel(task.id, Some("Server shutting down".to_string()))
                .await
            {
                Ok(_) => cancelled += 1,
                Err(e) => debug!(task_id = %task.id, error = %e, "Task finished before shutdown"),
            }
        }
        self.registry.clear().await;
        info!(cancelled, "Registry shut down");
        cancelled
    }
}

/// Spawn the periodic sweep loop. It stops when `shutdown` is cancelled.
pub fn spawn_sweeper(sweeper: Arc<Sweeper>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Sweeper started (interval: {}s, retention: {}s)",
            sweeper.interval.as_secs(),
            sweeper.retention.as_secs()
        );
        let mut interval = tokio::time::interval(sweeper.interval);
        // The first tick fires immediately; nothing can have expired yet.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    sweeper.sweep().await;
                }
            }
        }
        if sweeper.registry.list_all().await.is_empty() {
            debug!("Sweeper stopped");
        } else {
            warn!("Sweeper stopped with tasks still registered");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, StreamMessage};
    use crate::task::{TaskConfig, TaskStatus};

    fn registry() -> Arc<TaskRegistry> {
        Arc::new(TaskRegistry::in_memory())
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired_terminal_tasks() {
        let registry = registry();
        let done = registry.create("done", TaskConfig::default()).await;
        registry
            .set_status(done, TaskStatus::Running, None)
            .await
            .unwrap();
        registry.set_result(done, "ok".into()).await.unwrap();
        let running = registry.create("running", TaskConfig::default()).await;
        registry
            .set_status(running, TaskStatus::Running, None)
            .await
            .unwrap();

        let keep = Sweeper::new(Arc::clone(&registry), Duration::from_secs(3600), Duration::from_secs(60));
        assert_eq!(keep.sweep().await, 0);
        assert!(registry.get(done).await.is_ok());

        let evict = Sweeper::new(Arc::clone(&registry), Duration::ZERO, Duration::from_secs(60));
        assert_eq!(evict.sweep().await, 1);
        assert!(registry.get(done).await.is_err());
        assert!(registry.register_observer(done, None).await.is_err());
        assert!(registry.get(running).await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_cancels_active_and_clears() {
        let registry = registry();
        let a = registry.create("a", TaskConfig::default()).await;
        let b = registry.create("b", TaskConfig::default()).await;
        registry.set_status(b, TaskStatus::Running, None).await.unwrap();
        let finished = registry.create("c", TaskConfig::default()).await;
        registry.cancel(finished, None).await.unwrap();

        let token = registry.cancellation_token(b).await.unwrap();
        let mut sub = registry.register_observer(b, None).await.unwrap();

        let sweeper = Sweeper::new(Arc::clone(&registry), Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(sweeper.shutdown().await, 2);

        assert!(token.is_cancelled());
        let mut last = None;
        while let Some(StreamMessage::Event(e)) = sub.recv().await {
            last = Some(e.kind);
        }
        assert_eq!(
            last,
            Some(EventKind::Status {
                status: TaskStatus::Cancelled,
                message: Some("Server shutting down".into())
            })
        );
        assert!(registry.list_all().await.is_empty());
        assert!(registry.get(a).await.is_err());
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown_token() {
        let sweeper = Arc::new(Sweeper::new(registry(), Duration::ZERO, Duration::from_millis(10)));
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(Arc::clone(&sweeper), shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
