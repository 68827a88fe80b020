//! Pub/Sub Event Bus — a simple fan-out on top of the Store Adapter's
//! publish/subscribe, carrying lifecycle events to external observers.
//! Delivery is best-effort; subscribers must tolerate missed events and
//! reconcile from the Task Registry if exactness is required.

mod error;

pub use error::{EventBusError, EventBusResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskqueue_registry::TaskState;
use taskqueue_store::StoreAdapter;
use tracing::{debug, warn};

/// Stable wire names for the event kinds this system emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChange,
    TaskAdded,
    TaskCompleted,
    TaskFailed,
    GroupChange,
    ProgressUpdate,
    RetryAttempt,
}

impl EventKind {
    /// The pub/sub channel name this kind is published on:
    /// `events:{kind}`.
    pub fn channel(self) -> String {
        let name = match self {
            EventKind::StatusChange => "status_change",
            EventKind::TaskAdded => "task_added",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::GroupChange => "group_change",
            EventKind::ProgressUpdate => "progress_update",
            EventKind::RetryAttempt => "retry_attempt",
        };
        format!("events:{name}")
    }
}

/// A lifecycle event. `group_name`/`state`/`data` are optional because not
/// every kind populates every field (e.g. `group_change` has no `state`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(kind: EventKind, task_id: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            group_name: None,
            state: None,
            data: None,
        }
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Publishes lifecycle events. Implemented directly on top of any
/// [`StoreAdapter`] so producers (the Group Manager, the Worker Pool)
/// never need to know whether delivery goes through Redis pub/sub or the
/// in-memory broadcast fan-out.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> EventBusResult<()>;
    async fn subscribe(&self, kind: EventKind) -> EventBusResult<tokio::sync::mpsc::Receiver<Event>>;
}

/// The only [`EventBus`] implementation needed: it works identically
/// whether `store` is a [`taskqueue_store::RedisStore`] (cross-process
/// fan-out) or a [`taskqueue_store::MemoryStore`] (single-process,
/// `tokio::sync::broadcast`-backed). Named `StoreEventBus` rather than
/// `RedisEventBus`/`LocalEventBus` because the distinction lives entirely
/// in which adapter it is handed.
pub struct StoreEventBus {
    store: Arc<dyn StoreAdapter>,
}

impl StoreEventBus {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventBus for StoreEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        let channel = event.kind.channel();
        let payload = serde_json::to_string(&event)?;
        self.store.publish(&channel, &payload).await?;
        debug!(task_id = %event.task_id, channel = %channel, "event published");
        Ok(())
    }

    async fn subscribe(&self, kind: EventKind) -> EventBusResult<tokio::sync::mpsc::Receiver<Event>> {
        let mut raw_rx = self.store.subscribe(&kind.channel()).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        tokio::spawn(async move {
            while let Some(payload) = raw_rx.recv().await {
                match serde_json::from_str::<Event>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "dropping malformed event payload"),
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_store::MemoryStore;

    #[tokio::test]
    async fn publish_subscribe_round_trips_event() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let bus = StoreEventBus::new(store);

        let mut rx = bus.subscribe(EventKind::TaskCompleted).await.unwrap();
        let event = Event::new(EventKind::TaskCompleted, "t1").with_group("g1");
        bus.publish(event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.task_id, "t1");
        assert_eq!(received.group_name.as_deref(), Some("g1"));
        assert_eq!(received.kind, EventKind::TaskCompleted);
    }

    #[tokio::test]
    async fn subscribers_only_see_their_own_kind() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let bus = StoreEventBus::new(store);

        let mut completed_rx = bus.subscribe(EventKind::TaskCompleted).await.unwrap();
        let mut failed_rx = bus.subscribe(EventKind::TaskFailed).await.unwrap();

        bus.publish(Event::new(EventKind::TaskCompleted, "t1"))
            .await
            .unwrap();

        let received = completed_rx.recv().await.unwrap();
        assert_eq!(received.task_id, "t1");

        // The failed-event channel never received anything; give the
        // publish a moment to propagate, then confirm nothing arrived.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(failed_rx.try_recv().is_err());
    }
}
