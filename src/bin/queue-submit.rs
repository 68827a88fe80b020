//! Submits one task against a running (or about-to-run) engine's shared
//! store — the Submit API exposed as a CLI. Connects to the store
//! directly without starting any worker pool: connect, do one thing,
//! exit.

use clap::Parser;
use grouped_queue::cli;
use std::time::{Duration, SystemTime};
use taskqueue_engine::{Engine, Priority, TaskOptions};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Submit a task to the queue", long_about = None)]
struct Args {
    /// Path to a queue.toml config file.
    #[arg(short, long)]
    config: Option<String>,

    /// Handler method name to invoke.
    #[arg(short, long)]
    method: String,

    /// Task payload, as a raw string (stored as UTF-8 bytes).
    #[arg(short, long, default_value = "")]
    payload: String,

    /// Target queue; defaults to the engine's first configured queue.
    #[arg(short, long)]
    queue: Option<String>,

    /// Group label. Omit for an ungrouped task (synthetic per-queue group).
    #[arg(short, long)]
    group: Option<String>,

    /// Priority: low, normal, high, or critical.
    #[arg(long, default_value = "normal")]
    priority: String,

    /// Maximum retry attempts after the first.
    #[arg(long, default_value_t = 0)]
    max_retries: u32,

    /// Base retry backoff, in milliseconds.
    #[arg(long, default_value_t = 0)]
    retry_delay_ms: u64,

    /// Delay the task's earliest eligibility by this many seconds.
    #[arg(long)]
    delay_seconds: Option<u64>,

    /// Per-attempt execution timeout, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn parse_priority(s: &str) -> anyhow::Result<Priority> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "low" => Priority::Low,
        "normal" => Priority::Normal,
        "high" => Priority::High,
        "critical" => Priority::Critical,
        other => anyhow::bail!("unrecognized priority {other:?} (expected low|normal|high|critical)"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init();
    let args = Args::parse();
    let config = cli::load_config(args.config.as_deref())?;

    let options = TaskOptions {
        priority: parse_priority(&args.priority)?,
        max_retries: args.max_retries,
        retry_delay_ms: args.retry_delay_ms,
        not_before: args.delay_seconds.map(|s| SystemTime::now() + Duration::from_secs(s)),
        timeout_ms: args.timeout_ms,
        queue: args.queue.clone(),
        group: args.group.clone(),
    };

    let ctx = Engine::connect(&config).await?;
    let id = ctx.enqueue(&args.method, args.payload.into_bytes(), options).await?;

    info!(task_id = %id, method = %args.method, "task submitted");
    println!("{id}");
    Ok(())
}
