//! Operator inspection and control: group stats, pause/resume, and task
//! listing. Connects directly to the store, the same way `queue-submit`
//! does, rather than through a running worker process.

use clap::{Parser, Subcommand};
use grouped_queue::cli;
use taskqueue_engine::{Engine, ListFilter, TaskState};

#[derive(Parser)]
#[command(author, version, about = "Inspect and control the task queue", long_about = None)]
struct Args {
    /// Path to a queue.toml config file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a group's cached aggregate stats.
    Stats {
        /// Group name.
        group: String,
    },
    /// Pause every WAITING/DELAYED task in a group.
    Pause {
        /// Group name.
        group: String,
    },
    /// Resume every PAUSED task in a group, restoring arrival order.
    Resume {
        /// Group name.
        group: String,
    },
    /// List tasks in a queue, optionally filtered by state or group.
    List {
        /// Queue name.
        queue: String,
        /// Restrict to one state: waiting, active, completed, failed,
        /// delayed, paused, or unknown.
        #[arg(long)]
        state: Option<String>,
        /// Restrict to one group.
        #[arg(long)]
        group: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init();
    let args = Args::parse();
    let config = cli::load_config(args.config.as_deref())?;
    let ctx = Engine::connect(&config).await?;

    match args.command {
        Command::Stats { group } => {
            let stats = ctx.groups().get_stats(&group).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Pause { group } => {
            let paused = ctx.groups().pause_all(&group).await?;
            println!("paused {paused} task(s) in group {group:?}");
        }
        Command::Resume { group } => {
            let resumed = ctx.groups().resume_all(&group).await?;
            println!("resumed {resumed} task(s) in group {group:?}");
        }
        Command::List { queue, state, group } => {
            let state = state
                .map(|s| s.parse::<TaskState>().map_err(|e| anyhow::anyhow!(e)))
                .transpose()?;
            let tasks = ctx
                .registry()
                .list(&queue, ListFilter { state, group })
                .await?;
            for task in tasks {
                println!(
                    "{}\t{}\t{}\tattempts={}\tstate={}",
                    task.id, task.method, task.group.as_deref().unwrap_or("-"), task.attempts, task.state
                );
            }
        }
    }

    Ok(())
}
