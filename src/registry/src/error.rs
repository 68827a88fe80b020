//! Error taxonomy for the Task Registry.

use taskqueue_store::StoreError;
use thiserror::Error;

/// Errors surfaced by [`crate::Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `put` was invoked as an insert and a task with this id already
    /// exists.
    #[error("task id already exists: {0}")]
    DuplicateId(String),

    /// `get`/`update` found no record for the given id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A stored task record failed to deserialize.
    #[error("task record corrupt: {0}")]
    Corrupt(String),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
