//! Store Adapter — a thin, stateless-beyond-its-connection-pool wrapper
//! over a networked key/value/set/sorted-set/pub-sub store, exposing the
//! handful of atomic primitives every other component is built on.
//!
//! Two implementations are provided: [`redis_store::RedisStore`] for
//! production deployments, and [`memory::MemoryStore`] for tests and
//! single-process deployments that don't want a live Redis dependency.
//! Both implement the same [`StoreAdapter`] trait, so the rest of the
//! workspace is written against the trait object and never cares which
//! backend it is talking to.

#![deny(unsafe_code)]

mod error;
pub mod memory;
pub mod redis_store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A single write to apply as part of an [`StoreAdapter::execute_optimistic`]
/// transaction. Kept as a closed enum (rather than a free-form closure)
/// so that both the Redis-backed `MULTI`/`EXEC` pipeline and the in-memory
/// adapter can interpret the same instructions.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Store a plain string value.
    Set { key: String, value: String },
    /// Add a member to an unordered set.
    SAdd { key: String, member: String },
    /// Remove a member from an unordered set.
    SRem { key: String, member: String },
    /// Add (or update the score of) a member in a sorted set.
    ZAdd { key: String, member: String, score: f64 },
    /// Remove a member from a sorted set.
    ZRem { key: String, member: String },
    /// Set a single field in a hash.
    HSet { key: String, field: String, value: String },
    /// Remove a single field from a hash.
    HDel { key: String, field: String },
}

/// Thin abstraction over the shared key/value/set/sorted-set/pub-sub
/// backing store.
///
/// All methods are `&self` — implementations own their own connection
/// pooling/cloning internally (as `redis::aio::ConnectionManager` already
/// does), holding a cheaply-cloneable connection handle behind
/// `Arc`/`Clone`.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Read a plain string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Write a plain string value, replacing any existing value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Read one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    /// Write one field of a hash.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    /// Remove one field of a hash.
    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()>;
    /// Read every field of a hash.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Add a member to an unordered set. Idempotent.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;
    /// Remove a member from an unordered set.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;
    /// List every member of an unordered set.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
    /// Count members of an unordered set.
    async fn scard(&self, key: &str) -> StoreResult<u64>;
    /// Test membership in an unordered set.
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Add or reschedule a member of a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;
    /// Remove a member from a sorted set.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()>;
    /// Read the lowest-scored `count` members, ascending.
    async fn zrange_head(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>>;
    /// Read the score of a single member, if present.
    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;
    /// Count members of a sorted set.
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Publish a payload on a channel. Best-effort: no subscriber
    /// acknowledgment.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;
    /// Subscribe to a channel, receiving payloads as they are published.
    /// Delivery is best-effort; a slow receiver simply misses messages
    /// published while it isn't polling the returned channel's buffer.
    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::Receiver<String>>;

    /// Server-authoritative current time, in milliseconds since the Unix
    /// epoch. Used as the arrival-order clock.
    async fn server_time_millis(&self) -> StoreResult<u64>;

    /// Compose the next arrival-order score: the current server time with
    /// ties broken by a monotonic counter local to this adapter instance.
    /// Strictly increasing across calls on the same adapter, even within
    /// the same millisecond, as long as fewer than 1,000,000 calls land
    /// in one millisecond.
    async fn next_arrival_score(&self) -> StoreResult<f64>;

    /// Run a sequence of writes as an optimistic transaction: `WATCH` every
    /// key named in `watch_keys`, then attempt the writes as one atomic
    /// unit. Returns `Ok(true)` on success, `Ok(false)` if a watched key
    /// changed concurrently (the caller retries per its own policy — the
    /// adapter never retries internally).
    async fn execute_optimistic(
        &self,
        watch_keys: &[String],
        ops: Vec<WriteOp>,
    ) -> StoreResult<bool>;

    /// The one primitive the Group Manager's `claimNext` is built on:
    /// atomically pop the lowest-scored member of `order_key`
    /// and add it to `processing_key`, but only if `processing_key` has
    /// fewer than `cap` members. Returns `None` if `order_key` is empty or
    /// `processing_key` is already at capacity.
    ///
    /// This is deliberately a dedicated primitive rather than a
    /// generic-ops transaction: a naive "read the head, then
    /// WATCH+MULTI+EXEC a blind remove" sequence has a race window
    /// between the read and the watch. A single round-trip
    /// compare-and-pop (a Lua script server-side for Redis, a single
    /// critical section for the in-memory adapter) closes that window
    /// while preserving the contract: hand out each task id to exactly
    /// one caller.
    async fn claim_head(
        &self,
        order_key: &str,
        processing_key: &str,
        cap: usize,
    ) -> StoreResult<Option<(String, f64)>>;
}

/// Compose an arrival-order score from a millisecond timestamp and a
/// tie-breaking sequence number. Exposed so callers that need to
/// recompute a comparable score outside of [`StoreAdapter::next_arrival_score`]
/// (e.g. the Group Manager's `requeueTask`, which schedules a future
/// score rather than "now") stay on the same scale.
pub fn compose_score(millis: u64, seq: u64) -> f64 {
    (millis as f64) * 1_000_000.0 + (seq % 1_000_000) as f64
}
