//! Ambient wiring layer: loads operator configuration, constructs the
//! store/registry/group/scheduler/workers/eventbus stack, exposes the
//! Submit and Observer API, and optionally serves `/metrics`.

#![deny(unsafe_code)]

mod config;
mod context;
mod engine;
mod error;
mod metrics;
mod runtime;

pub use config::{EngineConfig, MetricsSettings, QueueSettings, StoreBackend, StoreSettings};
pub use context::EngineContext;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use runtime::EngineRuntime;

// Re-exported so callers only need to depend on this crate to build a
// complete producer/worker/admin binary.
pub use taskqueue_eventbus::{Event, EventKind};
pub use taskqueue_group::GroupStats;
pub use taskqueue_registry::{ListFilter, Priority, PutMode, Registry, Task, TaskId, TaskOptions, TaskState};
pub use taskqueue_scheduler::DispatchPolicy;
pub use taskqueue_workers::{HandlerFailure, TaskContext, TaskHandler};
