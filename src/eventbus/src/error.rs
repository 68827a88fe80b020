use taskqueue_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EventBusResult<T> = Result<T, EventBusError>;
