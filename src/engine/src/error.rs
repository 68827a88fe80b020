//! Top-level error taxonomy, composing every crate's error type behind
//! one enum via `#[from]`.

use taskqueue_eventbus::EventBusError;
use taskqueue_group::GroupError;
use taskqueue_registry::RegistryError;
use taskqueue_scheduler::DispatchError;
use taskqueue_store::StoreError;
use taskqueue_workers::WorkerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),

    /// `TaskOptions.queue` (or the engine's default) named a queue the
    /// engine was never configured to serve.
    #[error("queue {0:?} is not configured on this engine")]
    UnknownQueue(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
