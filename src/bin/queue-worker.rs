//! Runs the Worker Pool: loads operator configuration, registers the
//! built-in demo handlers, starts the engine, and drains in-flight work
//! on SIGINT/SIGTERM.

use clap::Parser;
use grouped_queue::cli;
use serde_json::Value;
use std::sync::Arc;
use taskqueue_engine::{Engine, HandlerFailure, TaskContext, TaskHandler};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about = "Run the task queue's worker pool", long_about = None)]
struct Args {
    /// Path to a queue.toml config file, merged over configs/queue.toml
    /// and QUEUE__-prefixed environment overrides.
    #[arg(short, long)]
    config: Option<String>,
}

/// Logs its payload and succeeds. Registered under `"echo"` so a fresh
/// checkout has something to submit against before any application
/// registers its own handlers.
struct EchoHandler;

#[async_trait::async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, payload: Vec<u8>, ctx: TaskContext) -> Result<(), HandlerFailure> {
        let body: Value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        info!(task_id = %ctx.task_id, attempt = ctx.attempt, payload = %body, "echo handler invoked");
        ctx.report_progress(serde_json::json!({"received": body})).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init();
    let args = Args::parse();
    let config = cli::load_config(args.config.as_deref())?;

    info!(queues = config.queues.len(), policy = ?config.policy, "starting queue-worker");

    let mut engine = Engine::new(config);
    engine.register_handler("echo", Arc::new(EchoHandler) as Arc<dyn TaskHandler>);

    let runtime = engine.start().await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(%err, "failed to install ctrl-c handler");
            }
        }
    }

    info!("shutdown signal received, draining in-flight tasks");
    if let Err(err) = runtime.shutdown().await {
        warn!(%err, "worker pool shutdown reported an error");
        return Err(err.into());
    }

    info!("queue-worker exited cleanly");
    Ok(())
}
