//! `EngineContext` — the cheaply-cloneable shared handle producers and
//! observers hold, an `Arc<SharedState>` passed around rather than
//! threaded field-by-field.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use taskqueue_eventbus::{Event, EventBus, EventKind};
use taskqueue_group::GroupManager;
use taskqueue_registry::{PutMode, Registry, Task, TaskId, TaskOptions};
use taskqueue_scheduler::Dispatcher;
use taskqueue_store::StoreAdapter;
use taskqueue_workers::HandlerRegistry;
use tracing::info;
use uuid::Uuid;

struct SharedState {
    config: EngineConfig,
    store: Arc<dyn StoreAdapter>,
    registry: Arc<Registry>,
    groups: Arc<GroupManager>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<dyn EventBus>,
    handlers: Arc<HandlerRegistry>,
    /// Explicit groups the engine has already assigned a concurrency cap
    /// to. `groupConcurrencyCap` applies the first time an explicit
    /// group is seen; an operator's later `queue-admin` cap override is
    /// never clobbered by a subsequent `enqueue`.
    capped_groups: Mutex<HashSet<String>>,
}

/// The Submit API (`enqueue`/`enqueueBatch`) and Observer API
/// (`subscribe`), plus accessors the root binaries use to build their
/// own `queue-admin` inspection commands.
#[derive(Clone)]
pub struct EngineContext {
    shared: Arc<SharedState>,
}

impl EngineContext {
    pub(crate) fn new(
        config: EngineConfig,
        store: Arc<dyn StoreAdapter>,
        registry: Arc<Registry>,
        groups: Arc<GroupManager>,
        dispatcher: Arc<Dispatcher>,
        events: Arc<dyn EventBus>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(SharedState {
                config,
                store,
                registry,
                groups,
                dispatcher,
                events,
                handlers,
                capped_groups: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn store(&self) -> Arc<dyn StoreAdapter> {
        self.shared.store.clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.shared.registry.clone()
    }

    pub fn groups(&self) -> Arc<GroupManager> {
        self.shared.groups.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.shared.dispatcher.clone()
    }

    pub fn events(&self) -> Arc<dyn EventBus> {
        self.shared.events.clone()
    }

    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        self.shared.handlers.clone()
    }

    /// Submit a single task, routed to `options.queue` (or the engine's
    /// default queue) and `options.group` (or the synthetic per-queue
    /// group). Returns the generated task id.
    pub async fn enqueue(&self, name: &str, payload: Vec<u8>, options: TaskOptions) -> EngineResult<TaskId> {
        let queue = options
            .queue
            .clone()
            .unwrap_or_else(|| self.shared.config.default_queue().to_string());

        let concurrency = self
            .shared
            .config
            .queue(&queue)
            .map(|q| q.concurrency)
            .ok_or_else(|| EngineError::UnknownQueue(queue.clone()))?;

        let id = Uuid::new_v4().to_string();
        let task = Task::new(&id, &queue, name, payload, options.group.clone(), options.clone());
        self.shared.registry.put(&task, PutMode::Insert).await?;

        let group = self
            .shared
            .groups
            .resolve_group(options.group.as_deref(), &queue, concurrency)
            .await?;

        if options.group.is_some() {
            let first_sighting = self.shared.capped_groups.lock().insert(group.clone());
            if first_sighting {
                self.shared.groups.set_cap(&group, self.shared.config.group_concurrency_cap).await?;
            }
        }

        self.shared.groups.add_task(&group, &id, &queue, &options).await?;

        info!(task_id = %id, queue, group, method = name, "task submitted");
        Ok(id)
    }

    /// Submit a batch of `(method, payload, options)` triples, returning
    /// ids in submission order.
    pub async fn enqueue_batch(&self, items: Vec<(String, Vec<u8>, TaskOptions)>) -> EngineResult<Vec<TaskId>> {
        let mut ids = Vec::with_capacity(items.len());
        for (name, payload, options) in items {
            ids.push(self.enqueue(&name, payload, options).await?);
        }
        Ok(ids)
    }

    /// Subscribe to lifecycle events of one kind. There is no explicit
    /// `unsubscribe`: dropping the returned receiver is unsubscription,
    /// matching `taskqueue_eventbus::EventBus::subscribe`'s channel-based
    /// contract.
    pub async fn subscribe(&self, kind: EventKind) -> EngineResult<tokio::sync::mpsc::Receiver<Event>> {
        Ok(self.shared.events.subscribe(kind).await?)
    }
}
