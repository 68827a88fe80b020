//! `Engine` — construction and startup: takes a config, wires every
//! crate's component together, and hands back a running [`EngineRuntime`].

use crate::config::{EngineConfig, StoreBackend};
use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::metrics::spawn_metrics_service;
use std::sync::Arc;
use taskqueue_eventbus::{EventBus, StoreEventBus};
use taskqueue_group::{synthetic_group_name, GroupManager};
use taskqueue_registry::Registry;
use taskqueue_scheduler::Dispatcher;
use taskqueue_store::{MemoryStore, RedisStore, StoreAdapter};
use taskqueue_workers::{HandlerRegistry, TaskHandler, WorkerPool, WorkerPoolConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runtime::EngineRuntime;

async fn build_store(config: &EngineConfig) -> EngineResult<Arc<dyn StoreAdapter>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.redis_url).await?),
    })
}

/// Builds an [`EngineContext`] and the per-queue worker pools from
/// configuration, then hands out a cancellable [`EngineRuntime`].
pub struct Engine {
    config: EngineConfig,
    handlers: HandlerRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    /// Register a handler for `method`. Must be called before [`Self::start`];
    /// the handler registry is immutable once the engine is running.
    pub fn register_handler(&mut self, method: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.register(method, handler);
    }

    /// Wire the store, registry, group manager, dispatcher, and event bus
    /// without spawning any worker pool — what a producer- or
    /// observer-only process (`queue-submit`, `queue-admin`) needs to
    /// talk to the same store a `queue-worker` process is draining,
    /// without also standing up execution slots of its own.
    pub async fn connect(config: &EngineConfig) -> EngineResult<EngineContext> {
        let store = build_store(config).await?;
        let events: Arc<dyn EventBus> = Arc::new(StoreEventBus::new(store.clone()));
        let registry = Arc::new(Registry::new(store.clone()));
        let groups = Arc::new(GroupManager::new(store.clone(), events.clone()));
        let dispatcher = Arc::new(Dispatcher::new(groups.clone(), config.policy));

        Ok(EngineContext::new(
            config.clone(),
            store,
            registry,
            groups,
            dispatcher,
            events,
            Arc::new(HandlerRegistry::new()),
        ))
    }

    /// Wire the store, registry, group manager, dispatcher, event bus,
    /// and one worker pool per configured queue, then spawn every pool's
    /// slots as cancellable tasks (the `ServiceRegistration` pattern,
    /// reused here per queue instead of per platform service).
    pub async fn start(self) -> EngineResult<EngineRuntime> {
        let store = build_store(&self.config).await?;

        let events: Arc<dyn EventBus> = Arc::new(StoreEventBus::new(store.clone()));
        let registry = Arc::new(Registry::new(store.clone()));
        let groups = Arc::new(GroupManager::new(store.clone(), events.clone()));
        let dispatcher = Arc::new(Dispatcher::new(groups.clone(), self.config.policy));

        for queue in &self.config.queues {
            if queue.priority != 1 {
                dispatcher.set_group_priority(synthetic_group_name(&queue.name), queue.priority);
            }
        }

        let handlers = Arc::new(self.handlers);
        let root_token = CancellationToken::new();

        let context = EngineContext::new(
            self.config.clone(),
            store,
            registry.clone(),
            groups.clone(),
            dispatcher.clone(),
            events.clone(),
            handlers.clone(),
        );

        let mut worker_tasks = Vec::with_capacity(self.config.queues.len());
        for queue in &self.config.queues {
            let pool = Arc::new(WorkerPool::new(
                WorkerPoolConfig {
                    queue: queue.name.clone(),
                    concurrency: queue.concurrency,
                    polling_interval: std::time::Duration::from_millis(self.config.polling_interval_ms),
                    shutdown_timeout: std::time::Duration::from_millis(self.config.shutdown_timeout_ms),
                    max_backoff: std::time::Duration::from_millis(self.config.max_backoff_ms),
                },
                dispatcher.clone(),
                groups.clone(),
                registry.clone(),
                events.clone(),
                handlers.clone(),
            ));

            let token = root_token.child_token();
            let queue_name = queue.name.clone();
            info!(queue = %queue_name, slots = queue.concurrency, "spawning worker pool");
            let handle = tokio::spawn(async move { pool.run(token).await });
            worker_tasks.push((queue_name, handle));
        }

        let metrics_task = Some(spawn_metrics_service(context.clone(), self.config.metrics.clone(), root_token.child_token()));

        info!(queues = self.config.queues.len(), "engine boot completed");

        Ok(EngineRuntime {
            context,
            cancel_token: root_token,
            worker_tasks,
            metrics_task,
        })
    }
}
