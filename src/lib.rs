//! `grouped-queue` — the root package tying the task-queue workspace's
//! crates together into three operator-facing binaries: `queue-worker`,
//! `queue-submit`, and `queue-admin`.
//!
//! The scheduling core lives entirely in the `taskqueue-*` workspace
//! members; this crate contributes only the thin CLI/process-wiring
//! layer each binary would otherwise duplicate (dotenv load, tracing
//! init, config path resolution). Pulled out once here instead of
//! three times.

pub mod cli;

pub use taskqueue_engine as engine;
