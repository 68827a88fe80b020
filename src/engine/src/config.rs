//! Operator configuration: a TOML file merged with `QUEUE__`-prefixed
//! environment overrides.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskqueue_scheduler::DispatchPolicy;

const DEFAULT_CONFIG_PATH: &str = "configs/queue.toml";
const DEFAULT_GROUP_CONCURRENCY_CAP: usize = 1;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 250;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queues: Vec<QueueSettings>,
    pub policy: DispatchPolicy,
    pub polling_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub max_backoff_ms: u64,
    pub group_concurrency_cap: usize,
    pub store: StoreSettings,
    pub metrics: MetricsSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queues: vec![QueueSettings::default()],
            policy: DispatchPolicy::RoundRobin,
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            group_concurrency_cap: DEFAULT_GROUP_CONCURRENCY_CAP,
            store: StoreSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(None::<PathBuf>)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            File::from(PathBuf::from(DEFAULT_CONFIG_PATH))
                .format(FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.as_ref())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(Environment::with_prefix("QUEUE").separator("__"));

        let config = builder.build()?;
        config.try_deserialize().context("invalid engine configuration")
    }

    /// The first configured queue's name, used as the Submit API's
    /// routing default when `TaskOptions.queue` is unset.
    pub fn default_queue(&self) -> &str {
        self.queues.first().map(|q| q.name.as_str()).unwrap_or("default")
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.iter().find(|q| q.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: String,
    pub concurrency: usize,
    /// Weight consumed by the `priority` dispatch policy's synthetic
    /// per-queue group; ignored by `round_robin`/`fifo`.
    pub priority: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            concurrency: 4,
            priority: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}
