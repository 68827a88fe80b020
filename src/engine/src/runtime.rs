//! `EngineRuntime` — the handle returned by [`crate::Engine::start`],
//! with a cancel-and-await shutdown shape.

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct EngineRuntime {
    pub(crate) context: EngineContext,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) worker_tasks: Vec<(String, JoinHandle<Result<(), taskqueue_workers::WorkerError>>)>,
    pub(crate) metrics_task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl EngineRuntime {
    pub fn context(&self) -> EngineContext {
        self.context.clone()
    }

    /// Cancel every worker pool's root token and await a clean drain, up
    /// to each pool's own `shutdownTimeout` (enforced inside
    /// `WorkerPool::run` itself, not here).
    pub async fn shutdown(self) -> EngineResult<()> {
        self.cancel_token.cancel();

        for (queue, handle) in self.worker_tasks {
            match handle.await {
                Ok(Ok(())) => info!(queue, "worker pool shutdown cleanly"),
                Ok(Err(err)) => return Err(EngineError::Worker(err)),
                Err(join_err) => {
                    return Err(EngineError::Worker(taskqueue_workers::WorkerError::Handler(join_err.to_string())));
                }
            }
        }

        if let Some(metrics_task) = self.metrics_task {
            match metrics_task.await {
                Ok(Ok(())) => info!("metrics server shutdown cleanly"),
                Ok(Err(err)) => tracing::warn!(%err, "metrics server returned an error on shutdown"),
                Err(join_err) => tracing::warn!(%join_err, "metrics server task panicked"),
            }
        }

        info!("engine shutdown complete");
        Ok(())
    }
}
