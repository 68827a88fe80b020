use taskqueue_group::GroupError;
use taskqueue_registry::RegistryError;
use taskqueue_scheduler::DispatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The resolved handler returned a failure outcome. Carries the
    /// message the handler attached — never a panic or a thrown
    /// exception crossing the slot boundary.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The handler did not finish within `options.timeout_ms`.
    #[error("handler timed out after {0}ms")]
    Timeout(u64),

    /// `method` named no registered handler.
    #[error("no handler registered for method {0:?}")]
    UnknownMethod(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
