//! Worker Pool — a bounded set of execution slots that pull claimed
//! tasks from the Scheduler/Dispatcher, invoke the registered handler,
//! apply retry/backoff, and finalize task state.
//!
//! Handlers are plain trait objects looked up by name, no reflection;
//! each slot runs a cancellable spawn/drain/shutdown loop.

#![deny(unsafe_code)]

mod error;
mod handler;
mod pool;

pub use error::{WorkerError, WorkerResult};
pub use handler::{HandlerFailure, HandlerRegistry, TaskContext, TaskHandler};
pub use pool::{WorkerPool, WorkerPoolConfig};
