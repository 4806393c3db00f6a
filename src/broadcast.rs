//! Event broadcaster — per-task fan-out of log events to live observers.
//!
//! Each task has one [`ObserverSet`] behind a mutex. The registry holds that
//! mutex while it appends to the log and delivers, and while it replays the
//! log to a new observer, so every observer sees the same gap-free order.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::StreamMessage;

/// Sending half of one observer's stream.
#[derive(Debug)]
pub struct Observer {
    id: Uuid,
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl Observer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deliver one message. `false` means the transport is gone.
    pub fn send(&self, msg: StreamMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// The live observers of one task.
#[derive(Debug, Default)]
pub struct ObserverSet {
    observers: Vec<Observer>,
}

impl ObserverSet {
    pub fn attach(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub fn detach(&mut self, observer_id: Uuid) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != observer_id);
        self.observers.len() != before
    }

    /// Deliver to every observer, dropping the ones whose transport failed.
    /// Returns the number of observers pruned.
    pub fn deliver(&mut self, msg: &StreamMessage) -> usize {
        let before = self.observers.len();
        self.observers.retain(|o| {
            let ok = o.send(msg.clone());
            if !ok {
                debug!(observer_id = %o.id, "Dropping disconnected observer");
            }
            ok
        });
        before - self.observers.len()
    }

    /// Drop every observer, ending their streams. Returns how many were closed.
    pub fn close(&mut self) -> usize {
        let closed = self.observers.len();
        self.observers.clear();
        closed
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Fans task events out to observers.
#[derive(Debug, Default)]
pub struct Broadcaster {
    channels: RwLock<HashMap<Uuid, Arc<Mutex<ObserverSet>>>>,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an observer/subscription pair for a task. The observer still has
    /// to be attached to the task's [`ObserverSet`].
    pub fn observer(self: &Arc<Self>, task_id: Uuid) -> (Observer, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        (
            Observer { id, tx },
            Subscription {
                task_id,
                observer_id: id,
                rx: UnboundedReceiverStream::new(rx),
                broadcaster: Arc::clone(self),
            },
        )
    }

    /// The observer set for a task, created on first use.
    pub async fn open_channel(&self, task_id: Uuid) -> Arc<Mutex<ObserverSet>> {
        if let Some(channel) = self.channel(task_id).await {
            return channel;
        }
        let mut channels = self.channels.write().await;
        Arc::clone(channels.entry(task_id).or_default())
    }

    /// The observer set for a task, if the task has one.
    pub async fn channel(&self, task_id: Uuid) -> Option<Arc<Mutex<ObserverSet>>> {
        self.channels.read().await.get(&task_id).cloned()
    }

    pub async fn detach(&self, task_id: Uuid, observer_id: Uuid) -> bool {
        match self.channel(task_id).await {
            Some(channel) => {
                let detached = channel.lock().await.detach(observer_id);
                if detached {
                    debug!(task_id = %task_id, observer_id = %observer_id, "Observer detached");
                }
                detached
            }
            None => false,
        }
    }

    /// Close a task's observers and forget the task.
    pub async fn remove(&self, task_id: Uuid) -> usize {
        let channel = self.channels.write().await.remove(&task_id);
        match channel {
            Some(channel) => channel.lock().await.close(),
            None => 0,
        }
    }

    /// Close every observer of every task and forget all tasks.
    pub async fn clear(&self) -> usize {
        let channels: Vec<_> = self.channels.write().await.drain().map(|(_, c)| c).collect();
        let mut closed = 0;
        for channel in channels {
            closed += channel.lock().await.close();
        }
        closed
    }

    pub async fn observer_count(&self, task_id: Uuid) -> usize {
        match self.channel(task_id).await {
            Some(channel) => channel.lock().await.len(),
            None => 0,
        }
    }

    /// Send a keep-alive to every observer. Returns the number of dead
    /// observers pruned along the way.
    pub async fn heartbeat(&self) -> usize {
        let channels: Vec<_> = self.channels.read().await.values().cloned().collect();
        let mut pruned = 0;
        for channel in channels {
            pruned += channel.lock().await.deliver(&StreamMessage::Heartbeat);
        }
        pruned
    }
}

/// Spawn a background task that sends keep-alives on a fixed interval.
pub fn spawn_heartbeat(
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = broadcaster.heartbeat().await;
                    if pruned > 0 {
                        info!(count = pruned, "Pruned disconnected observers");
                    }
                }
            }
        }
        debug!("Heartbeat loop stopped");
    })
}

/// Receiving half of one observer's stream.
///
/// Dropping it detaches the observer right away instead of waiting for the
/// next failed delivery.
#[derive(Debug)]
pub struct Subscription {
    task_id: Uuid,
    observer_id: Uuid,
    rx: UnboundedReceiverStream<StreamMessage>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn observer_id(&self) -> Uuid {
        self.observer_id
    }

    /// Next message, or `None` once the task closed this observer.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.next().await
    }
}

impl Stream for Subscription {
    type Item = StreamMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let broadcaster = Arc::clone(&self.broadcaster);
        let (task_id, observer_id) = (self.task_id, self.observer_id);
        handle.spawn(async move {
            broadcaster.detach(task_id, observer_id).await;
        });
    }
}
