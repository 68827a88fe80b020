//! The handler registry (boundary to application code): an explicit
//! `HashMap<String, Arc<dyn TaskHandler>>` built via an explicit
//! `register` call, never through attribute-macro/decorator sugar or
//! reflection — a plain trait object looked up by name.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome a handler reports on failure. A discriminated `Result` value
/// rather than a thrown exception crossing the worker boundary.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub message: String,
}

impl HandlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerFailure {}

/// Per-invocation context handed to a handler: the claimed task's id, its
/// 1-indexed attempt number, a progress-reporting hook, and the
/// cancellation signal the handler should honor cooperatively.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub attempt: u32,
    progress: ProgressReporter,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: String,
        attempt: u32,
        progress: ProgressReporter,
        cancellation: CancellationToken,
    ) -> Self {
        Self { task_id, attempt, progress, cancellation }
    }

    /// Report progress; fans out as a `progress_update` event. Best
    /// effort — a handler that calls this from a hot loop never blocks
    /// on a slow subscriber.
    pub async fn report_progress(&self, data: serde_json::Value) {
        self.progress.report(&self.task_id, data).await;
    }

    /// The signal a long-running handler may `select!` against to stop
    /// early on a per-task timeout or admin cancellation. Not tied to
    /// pool shutdown: a handler in flight when shutdown is signalled is
    /// awaited up to `shutdownTimeout`, not interrupted through here.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Thin wrapper so `TaskContext` doesn't need to know which `EventBus`
/// implementation it's talking to.
#[derive(Clone)]
pub(crate) struct ProgressReporter {
    inner: Arc<dyn Fn(&str, serde_json::Value) -> futures::future::BoxFuture<'static, ()> + Send + Sync>,
}

impl ProgressReporter {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(&str, serde_json::Value) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    async fn report(&self, task_id: &str, data: serde_json::Value) {
        (self.inner)(task_id, data).await
    }
}

/// The handler contract: application code registers one implementation
/// per `method` name. No reflection, no decorator sugar — `register`
/// is an explicit call.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>, ctx: TaskContext) -> Result<(), HandlerFailure>;
}

/// A lookup table from `method` name to handler, built entirely by
/// explicit registration.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(method).cloned()
    }
}
