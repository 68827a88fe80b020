//! Shared process bootstrap for the three binaries: environment loading,
//! tracing initialization, and config-path resolution. Pulled out so the
//! three binaries don't each repeat the same
//! `dotenv().ok()` + `tracing_subscriber::fmt()` preamble.

use taskqueue_engine::EngineConfig;

/// Load `.env` (if present) and install a `tracing_subscriber` formatter
/// reading `RUST_LOG`, defaulting to `info`.
pub fn init() {
    dotenvy::dotenv().ok();
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Load engine configuration from an explicit path, if given, layered
/// over `configs/queue.toml` and `QUEUE__`-prefixed environment
/// variables (see [`EngineConfig::load_from_path`]).
pub fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    EngineConfig::load_from_path(path)
}
