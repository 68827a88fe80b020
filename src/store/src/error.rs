//! Error taxonomy for the Store Adapter: one `thiserror` enum, with
//! `#[from]` wiring the underlying client errors straight through rather
//! than re-wrapping them in ad-hoc strings.

use thiserror::Error;

/// Errors surfaced by a [`crate::StoreAdapter`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A network-level error talking to the backing store. The caller
    /// decides whether to retry; the adapter never retries internally.
    #[error("store transport error: {0}")]
    Transient(#[from] redis::RedisError),

    /// An optimistic transaction aborted because a watched key changed
    /// between `WATCH` and `EXEC`. Callers that need retry semantics (the
    /// Group Manager's `claimNext`) implement their own backoff on top of
    /// this signal.
    #[error("optimistic transaction conflict")]
    Conflict,

    /// A stored value failed to (de)serialize as UTF-8/JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the store adapter.
pub type StoreResult<T> = Result<T, StoreError>;
