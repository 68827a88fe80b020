use taskqueue_eventbus::EventBusError;
use taskqueue_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group {0} is at its concurrency cap")]
    CapacityExceeded(String),

    #[error("task {0} is not in the processing set")]
    NotProcessing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),
}

pub type GroupResult<T> = Result<T, GroupError>;
