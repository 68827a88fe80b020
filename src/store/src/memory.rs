//! In-memory [`StoreAdapter`], for tests and single-process deployments
//! that don't want a live Redis dependency.
//!
//! A single `parking_lot::Mutex`-guarded struct, no async lock held
//! across an `.await`, with `tokio::sync::broadcast` standing in for
//! Redis pub/sub.

use crate::{compose_score, StoreAdapter, StoreResult, WriteOp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    // member -> score, kept alongside a score-ordered index for zrange_head.
    zsets: HashMap<String, BTreeMap<OrderedScore, String>>,
    zscores: HashMap<String, HashMap<String, f64>>,
    sequence: u64,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// Total-ordered wrapper around `f64` so scores can key a `BTreeMap`.
/// Store scores are always finite (composed from wall-clock millis and a
/// sequence counter), so this never encounters NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedScore(f64);

impl Eq for OrderedScore {}
impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// A [`StoreAdapter`] that keeps all state in process memory behind a
/// single mutex. Suitable for tests and for single-node deployments that
/// don't need durability or cross-process sharing.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        if let Some(h) = self.state.lock().hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.state.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.state
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        if let Some(s) = self.state.lock().sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.state.lock().sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut state = self.state.lock();
        remove_from_zset(&mut state, key, member);
        state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(OrderedScore(score), member.to_string());
        state
            .zscores
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        remove_from_zset(&mut state, key, member);
        Ok(())
    }

    async fn zrange_head(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        let state = self.state.lock();
        Ok(state
            .zsets
            .get(key)
            .map(|z| z.iter().take(count).map(|(s, m)| (m.clone(), s.0)).collect())
            .unwrap_or_default())
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        Ok(self
            .state
            .lock()
            .zscores
            .get(key)
            .and_then(|m| m.get(member))
            .copied())
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.state.lock().zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let state = self.state.lock();
        if let Some(tx) = state.channels.get(channel) {
            // No subscribers is not an error; matches Redis PUBLISH semantics.
            let _ = tx.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::Receiver<String>> {
        let mut broadcast_rx = {
            let mut state = self.state.lock();
            let tx = state
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(256).0)
                .clone();
            tx.subscribe()
        };

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "memory store subscriber lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    async fn server_time_millis(&self) -> StoreResult<u64> {
        Ok(Self::now_millis())
    }

    async fn next_arrival_score(&self) -> StoreResult<f64> {
        let millis = Self::now_millis();
        let mut state = self.state.lock();
        state.sequence = state.sequence.wrapping_add(1);
        Ok(compose_score(millis, state.sequence))
    }

    async fn execute_optimistic(
        &self,
        _watch_keys: &[String],
        ops: Vec<WriteOp>,
    ) -> StoreResult<bool> {
        // A single process-wide mutex makes every call here already
        // serialized with respect to every other store call, so there is
        // no concurrent mutation to detect between watch and apply: the
        // "watch" step degenerates to a no-op and the transaction always
        // succeeds once it acquires the lock.
        let mut state = self.state.lock();
        for op in ops {
            apply_op(&mut state, op);
        }
        Ok(true)
    }

    async fn claim_head(
        &self,
        order_key: &str,
        processing_key: &str,
        cap: usize,
    ) -> StoreResult<Option<(String, f64)>> {
        let mut state = self.state.lock();

        let current = state.sets.get(processing_key).map(|s| s.len()).unwrap_or(0);
        if current >= cap {
            return Ok(None);
        }

        let head = state
            .zsets
            .get(order_key)
            .and_then(|z| z.iter().next())
            .map(|(score, member)| (member.clone(), score.0));

        let Some((member, score)) = head else {
            return Ok(None);
        };

        remove_from_zset(&mut state, order_key, &member);
        state
            .sets
            .entry(processing_key.to_string())
            .or_default()
            .insert(member.clone());

        Ok(Some((member, score)))
    }
}

fn remove_from_zset(state: &mut State, key: &str, member: &str) {
    if let Some(score) = state.zscores.get_mut(key).and_then(|m| m.remove(member)) {
        if let Some(z) = state.zsets.get_mut(key) {
            z.remove(&OrderedScore(score));
        }
    }
}

fn apply_op(state: &mut State, op: WriteOp) {
    match op {
        WriteOp::Set { key, value } => {
            state.strings.insert(key, value);
        }
        WriteOp::SAdd { key, member } => {
            state.sets.entry(key).or_default().insert(member);
        }
        WriteOp::SRem { key, member } => {
            if let Some(s) = state.sets.get_mut(&key) {
                s.remove(&member);
            }
        }
        WriteOp::ZAdd { key, member, score } => {
            remove_from_zset(state, &key, &member);
            state
                .zsets
                .entry(key.clone())
                .or_default()
                .insert(OrderedScore(score), member.clone());
            state.zscores.entry(key).or_default().insert(member, score);
        }
        WriteOp::ZRem { key, member } => {
            remove_from_zset(state, &key, &member);
        }
        WriteOp::HSet { key, field, value } => {
            state.hashes.entry(key).or_default().insert(field, value);
        }
        WriteOp::HDel { key, field } => {
            if let Some(h) = state.hashes.get_mut(&key) {
                h.remove(&field);
            }
        }
    }
}
