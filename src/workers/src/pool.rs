//! Worker Pool — a bounded set of execution slots that pull claimed
//! tasks, invoke the registered handler, apply retry/backoff, and
//! finalize state.
//!
//! Each slot runs its own cancellable spawn/await/shutdown loop, drawing
//! claimed tasks from the store-backed claim the Dispatcher performs.

use crate::error::{WorkerError, WorkerResult};
use crate::handler::{HandlerRegistry, ProgressReporter, TaskContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use taskqueue_eventbus::{Event, EventBus, EventKind};
use taskqueue_group::GroupManager;
use taskqueue_registry::{Registry, TaskState};
use taskqueue_scheduler::Dispatcher;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Per-queue worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// The queue this pool serves.
    pub queue: String,
    /// Number of execution slots — the pool's concurrency limit.
    pub concurrency: usize,
    /// Idle poll cadence when no group has an eligible head.
    pub polling_interval: Duration,
    /// Graceful drain window on shutdown.
    pub shutdown_timeout: Duration,
    /// Cap applied to the exponential retry backoff.
    pub max_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            queue: "default".to_string(),
            concurrency: 4,
            polling_interval: Duration::from_millis(250),
            shutdown_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
        }
    }
}

type InFlight = Mutex<HashMap<usize, Option<(String, String)>>>;

/// A bounded pool of `concurrency` execution slots for one queue.
/// Multiple `WorkerPool`s (even across processes) may serve the same
/// queue concurrently; the store's atomic claim primitive is what makes
/// that safe.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    dispatcher: Arc<Dispatcher>,
    groups: Arc<GroupManager>,
    registry: Arc<Registry>,
    events: Arc<dyn EventBus>,
    handlers: Arc<HandlerRegistry>,
    inflight: InFlight,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        dispatcher: Arc<Dispatcher>,
        groups: Arc<GroupManager>,
        registry: Arc<Registry>,
        events: Arc<dyn EventBus>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            groups,
            registry,
            events,
            handlers,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run every slot until `shutdown` is cancelled, then await in-flight
    /// work up to `shutdown_timeout` before returning. A handler that is
    /// still running when the deadline passes has its slot aborted and
    /// its claimed task released back to `WAITING` — never left
    /// `UNKNOWN`, and never routed through retry/failure accounting.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> WorkerResult<()> {
        info!(queue = %self.config.queue, slots = self.config.concurrency, "worker pool starting");

        let mut set = JoinSet::new();
        for slot_id in 0..self.config.concurrency {
            let pool = self.clone();
            let token = shutdown.clone();
            set.spawn(async move { pool.slot_loop(slot_id, token).await });
        }

        shutdown.cancelled().await;
        info!(queue = %self.config.queue, "shutdown signal received, draining in-flight tasks");

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, set.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if !set.is_empty() {
            warn!(queue = %self.config.queue, remaining = set.len(), "shutdown timeout elapsed, aborting slots");
            set.abort_all();
            while set.join_next().await.is_some() {}
            self.release_stuck_inflight().await?;
        }

        info!(queue = %self.config.queue, "worker pool stopped");
        Ok(())
    }

    async fn release_stuck_inflight(&self) -> WorkerResult<()> {
        let stuck: Vec<(String, String)> = self
            .inflight
            .lock()
            .values()
            .filter_map(|v| v.clone())
            .collect();

        for (group, task_id) in stuck {
            warn!(group, task_id, "releasing in-flight task after shutdown timeout");
            self.groups.requeue_task(&group, &task_id, 0).await?;
            if let Some(mut task) = self.registry.get(&task_id, None).await? {
                task.state = TaskState::Waiting;
                task.updated_at = SystemTime::now();
                self.registry.update(&task).await?;
            }
        }
        Ok(())
    }

    fn set_inflight(&self, slot_id: usize, value: Option<(String, String)>) {
        self.inflight.lock().insert(slot_id, value);
    }

    async fn slot_loop(self: Arc<Self>, slot_id: usize, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claim = match self.dispatcher.dispatch(&self.config.queue).await {
                Ok(claim) => claim,
                Err(err) => {
                    warn!(slot_id, %err, "dispatch error, backing off");
                    None
                }
            };

            let Some((group, task_id, _queue)) = claim else {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.polling_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            };

            self.set_inflight(slot_id, Some((group.clone(), task_id.clone())));
            if let Err(err) = self.execute_claimed(&group, &task_id).await {
                warn!(slot_id, group, task_id, %err, "task execution error");
            }
            self.set_inflight(slot_id, None);
        }
        debug!(slot_id, "slot loop exited");
    }

    /// Runs one claimed task to completion. The `shutdown` token that
    /// stops slots from claiming new work is deliberately *not* threaded
    /// into the handler's `TaskContext` here: a handler mid-flight when
    /// shutdown is signalled is awaited, not interrupted. A slot still
    /// running past `shutdown_timeout` is hard-aborted by `run` and its
    /// task released through `release_stuck_inflight`, not failed here.
    /// `TaskContext::cancellation` is reserved for per-task timeout and
    /// future admin-cancel signals.
    #[instrument(skip(self), fields(queue = %self.config.queue))]
    async fn execute_claimed(&self, group: &str, task_id: &str) -> WorkerResult<()> {
        let Some(mut task) = self.registry.get(task_id, None).await? else {
            warn!(task_id, "claimed task vanished from registry");
            return Ok(());
        };

        task.attempts += 1;
        task.state = TaskState::Active;
        task.updated_at = SystemTime::now();
        self.registry.update(&task).await?;

        let ctx = TaskContext::new(
            task_id.to_string(),
            task.attempts,
            self.progress_reporter(),
            CancellationToken::new(),
        );

        let handler = self.handlers.get(&task.method);
        let outcome = match handler {
            None => Err(crate::handler::HandlerFailure::new(format!(
                "no handler registered for method {:?}",
                task.method
            ))),
            Some(handler) => {
                let payload = task.payload.clone();
                let invocation = handler.handle(payload, ctx);
                match task.options.timeout_ms {
                    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), invocation).await {
                        Ok(result) => result,
                        Err(_) => {
                            self.events
                                .publish(
                                    Event::new(EventKind::RetryAttempt, task_id)
                                        .with_group(group)
                                        .with_data(serde_json::json!({"reason": "timeout"})),
                                )
                                .await
                                .ok();
                            Err(crate::handler::HandlerFailure::new(format!(
                                "handler timed out after {ms}ms"
                            )))
                        }
                    },
                    None => invocation.await,
                }
            }
        };

        match outcome {
            Ok(()) => self.finalize_success(group, &mut task).await,
            Err(failure) => self.finalize_failure(group, &mut task, failure.message).await,
        }
    }

    async fn finalize_success(&self, group: &str, task: &mut taskqueue_registry::Task) -> WorkerResult<()> {
        task.state = TaskState::Completed;
        task.updated_at = SystemTime::now();
        task.last_error = None;
        self.registry.update(task).await?;
        self.groups.complete_task(group, &task.id, TaskState::Completed).await?;
        debug!(task_id = %task.id, group, "task completed");
        Ok(())
    }

    async fn finalize_failure(
        &self,
        group: &str,
        task: &mut taskqueue_registry::Task,
        error: String,
    ) -> WorkerResult<()> {
        task.last_error = Some(error);
        task.updated_at = SystemTime::now();

        if task.attempts <= task.options.max_retries {
            let backoff_ms = compute_backoff(task.options.retry_delay_ms, task.attempts, self.config.max_backoff);
            task.state = if backoff_ms > 0 { TaskState::Delayed } else { TaskState::Waiting };
            self.registry.update(task).await?;
            self.groups.requeue_task(group, &task.id, backoff_ms).await?;
            debug!(task_id = %task.id, group, attempts = task.attempts, backoff_ms, "task requeued after failure");
        } else {
            task.state = TaskState::Failed;
            self.registry.update(task).await?;
            self.groups.complete_task(group, &task.id, TaskState::Failed).await?;
            warn!(task_id = %task.id, group, attempts = task.attempts, "task failed, retries exhausted");
        }
        Ok(())
    }

    fn progress_reporter(&self) -> ProgressReporter {
        let events = self.events.clone();
        ProgressReporter::new(move |task_id: &str, data: serde_json::Value| {
            let events = events.clone();
            let task_id = task_id.to_string();
            Box::pin(async move {
                let _ = events
                    .publish(Event::new(EventKind::ProgressUpdate, task_id).with_data(data))
                    .await;
            })
        })
    }
}

/// `retryDelayMs × 2^(attempts-1)`, capped at `max_backoff`.
fn compute_backoff(base_ms: u64, attempts: u32, max_backoff: Duration) -> u64 {
    let exponent = attempts.saturating_sub(1);
    let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_ms.saturating_mul(multiplier).min(max_backoff.as_millis() as u64)
}
