use taskqueue_group::GroupError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Group(#[from] GroupError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
