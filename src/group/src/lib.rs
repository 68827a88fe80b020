//! Group Manager — per-group membership, arrival order, the processing
//! set, and the atomic primitives the Scheduler and Worker Pool are
//! built on, layered over the cross-process atomic store primitives
//! `taskqueue-store` exposes.

mod error;
mod keys;
mod stats;

pub use error::{GroupError, GroupResult};
pub use keys::synthetic_group_name;
pub use stats::GroupStats;

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use taskqueue_eventbus::{Event, EventBus, EventKind};
use taskqueue_registry::{TaskOptions, TaskState};
use taskqueue_store::{compose_score, StoreAdapter, StoreError};
use tracing::{debug, info, warn};

const DEFAULT_CAP: usize = 1;
const CLAIM_RETRY_ATTEMPTS: u32 = 3;
const CLAIM_RETRY_BASE_MS: u64 = 100;

fn paused_scores_key(group: &str) -> String {
    format!("group:{group}:paused_scores")
}

/// Owns the per-group indices and the claim/complete/requeue/pause
/// primitives. Holds no in-process state of its own beyond its handles
/// to the store and event bus — every group's data lives in the store,
/// so any number of `GroupManager` instances (across processes) can
/// operate on the same groups concurrently.
pub struct GroupManager {
    store: Arc<dyn StoreAdapter>,
    events: Arc<dyn EventBus>,
}

impl GroupManager {
    pub fn new(store: Arc<dyn StoreAdapter>, events: Arc<dyn EventBus>) -> Self {
        Self { store, events }
    }

    /// Resolve the group a task should be scheduled under: the task's own
    /// `group`, or the synthetic `__queue__:{queue}` group when the task
    /// has none. Lazily sets the synthetic group's cap to
    /// `queue_concurrency` the first time it's created.
    pub async fn resolve_group(
        &self,
        group: Option<&str>,
        queue: &str,
        queue_concurrency: usize,
    ) -> GroupResult<String> {
        match group {
            Some(g) => Ok(g.to_string()),
            None => {
                let synthetic = synthetic_group_name(queue);
                if self.get_cap_raw(&synthetic).await?.is_none() {
                    self.set_cap(&synthetic, queue_concurrency).await?;
                }
                Ok(synthetic)
            }
        }
    }

    pub async fn set_cap(&self, group: &str, cap: usize) -> GroupResult<()> {
        self.store.set(&keys::cap_key(group), &cap.to_string()).await?;
        Ok(())
    }

    async fn get_cap_raw(&self, group: &str) -> GroupResult<Option<usize>> {
        Ok(self
            .store
            .get(&keys::cap_key(group))
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn get_cap(&self, group: &str) -> GroupResult<usize> {
        Ok(self.get_cap_raw(group).await?.unwrap_or(DEFAULT_CAP))
    }

    /// Add a task to a group's indices. Idempotent: re-adding an id
    /// already present in `membership` leaves membership and order
    /// unchanged (invariant 6).
    pub async fn add_task(
        &self,
        group: &str,
        task_id: &str,
        queue: &str,
        options: &TaskOptions,
    ) -> GroupResult<()> {
        if self.store.sismember(&keys::membership_key(group), task_id).await? {
            debug!(group, task_id, "add_task: already a member, no-op");
            return Ok(());
        }

        // Snapshot stats before writing this task's state, so a cold-cache
        // recompute inside `get_stats` (which reads `group:{g}:state`)
        // doesn't already see the task we're about to add.
        let mut stats = self.get_stats(group).await?;

        let score = self.store.next_arrival_score().await?;
        self.store.sadd(&keys::membership_key(group), task_id).await?;
        self.store.zadd(&keys::order_key(group), task_id, score).await?;
        self.store
            .hset(&keys::state_key(group), task_id, &TaskState::Waiting.to_string())
            .await?;
        self.store.set(&keys::queue_key(group), queue).await?;
        self.store.sadd(&keys::queue_groups_key(queue), group).await?;
        let options_json = serde_json::to_string(options).map_err(taskqueue_store::StoreError::from)?;
        self.store
            .hset(&keys::options_key(group), task_id, &options_json)
            .await?;

        stats.total += 1;
        self.write_stats(group, stats).await?;

        self.events
            .publish(
                Event::new(EventKind::GroupChange, task_id)
                    .with_group(group)
                    .with_data(serde_json::json!({"op": "add"})),
            )
            .await?;
        self.events
            .publish(
                Event::new(EventKind::TaskAdded, task_id)
                    .with_group(group)
                    .with_state(TaskState::Waiting),
            )
            .await?;

        info!(group, task_id, queue, "task added to group");
        Ok(())
    }

    /// The queue a group's tasks are drawn from, if the group has ever
    /// had a task added to it.
    pub async fn queue_of(&self, group: &str) -> GroupResult<Option<String>> {
        Ok(self.store.get(&keys::queue_key(group)).await?)
    }

    /// Every group that has ever had a task enqueued for `queue`, used by
    /// the Scheduler to enumerate its eligible group set.
    pub async fn list_groups_for_queue(&self, queue: &str) -> GroupResult<Vec<String>> {
        Ok(self.store.smembers(&keys::queue_groups_key(queue)).await?)
    }

    /// Peek a group's head without claiming it, for the Scheduler's
    /// policy decision. Returns `None` both when `order` is empty and
    /// when the head task's `notBefore` is still in the future — a
    /// not-yet-due head makes the scheduler treat the group's head as
    /// empty, falling through to the next group.
    pub async fn peek_head_due(&self, group: &str) -> GroupResult<Option<(String, f64)>> {
        let head = self.store.zrange_head(&keys::order_key(group), 1).await?;
        let Some((task_id, score)) = head.into_iter().next() else {
            return Ok(None);
        };

        let due = match self.store.hget(&keys::options_key(group), &task_id).await? {
            Some(raw) => match serde_json::from_str::<TaskOptions>(&raw) {
                Ok(options) => match options.not_before {
                    Some(not_before) => not_before <= SystemTime::now(),
                    None => true,
                },
                Err(_) => true,
            },
            None => true,
        };

        if due {
            Ok(Some((task_id, score)))
        } else {
            Ok(None)
        }
    }

    /// Number of tasks currently in `processing` for `group`.
    pub async fn processing_count(&self, group: &str) -> GroupResult<u64> {
        Ok(self.store.scard(&keys::processing_key(group)).await?)
    }

    /// Number of tasks currently in `order` (waiting or delayed, not yet
    /// claimed) for `group` — the queue depth a `/metrics` endpoint
    /// reports.
    pub async fn order_len(&self, group: &str) -> GroupResult<u64> {
        Ok(self.store.zcard(&keys::order_key(group)).await?)
    }

    /// The head a dispatch policy may hand to `claim_next`: `Some` only
    /// when `order` is non-empty, the group is under its concurrency cap,
    /// and the head task is due (see [`Self::peek_head_due`]). Combines
    /// the three checks the Scheduler's policies all need so each policy
    /// doesn't re-implement them.
    pub async fn eligible_head(&self, group: &str) -> GroupResult<Option<(String, f64)>> {
        let cap = self.get_cap(group).await?;
        let in_flight = self.processing_count(group).await?;
        if in_flight as usize >= cap {
            return Ok(None);
        }
        self.peek_head_due(group).await
    }

    /// The critical atomic primitive: hand out at most one claim per task
    /// id even under many concurrent callers. Built on
    /// [`StoreAdapter::claim_head`], which performs the capacity check
    /// and the order-to-processing move in a single round trip — so,
    /// unlike the exponential-backoff retry a naive
    /// read-then-compare-and-swap implementation would need against
    /// transaction conflicts, the only thing worth retrying here is a
    /// transient transport error. Kept as a bounded retry loop (100ms,
    /// factor 2, 3 attempts) for that case.
    pub async fn claim_next(&self, group: &str) -> GroupResult<Option<(String, String)>> {
        let cap = self.get_cap(group).await?;
        let order_key = keys::order_key(group);
        let processing_key = keys::processing_key(group);

        let mut delay = Duration::from_millis(CLAIM_RETRY_BASE_MS);
        for attempt in 0..CLAIM_RETRY_ATTEMPTS {
            match self.store.claim_head(&order_key, &processing_key, cap).await {
                Ok(None) => return Ok(None),
                Ok(Some((task_id, _score))) => {
                    self.store
                        .hset(&keys::state_key(group), &task_id, &TaskState::Active.to_string())
                        .await?;
                    let queue = self.store.get(&keys::queue_key(group)).await?.unwrap_or_default();

                    let mut stats = self.get_stats(group).await?;
                    stats.active += 1;
                    self.write_stats(group, stats).await?;

                    self.events
                        .publish(
                            Event::new(EventKind::StatusChange, &task_id)
                                .with_group(group)
                                .with_state(TaskState::Active),
                        )
                        .await?;

                    info!(group, task_id, "claimed task");
                    return Ok(Some((task_id, queue)));
                }
                Err(StoreError::Transient(err)) if attempt + 1 < CLAIM_RETRY_ATTEMPTS => {
                    warn!(group, attempt, %err, "claim_head transport error, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Finalize a task that left a worker slot's execution. `outcome`
    /// must be [`TaskState::Completed`] or [`TaskState::Failed`]; never
    /// re-inserts into `order`.
    pub async fn complete_task(&self, group: &str, task_id: &str, outcome: TaskState) -> GroupResult<()> {
        self.store.srem(&keys::processing_key(group), task_id).await?;
        self.store
            .hset(&keys::state_key(group), task_id, &outcome.to_string())
            .await?;

        let mut stats = self.get_stats(group).await?;
        stats.active = stats.active.saturating_sub(1);
        match outcome {
            TaskState::Completed => stats.completed += 1,
            TaskState::Failed => stats.failed += 1,
            other => warn!(group, task_id, state = %other, "complete_task called with non-terminal outcome"),
        }
        self.write_stats(group, stats).await?;

        let kind = match outcome {
            TaskState::Failed => EventKind::TaskFailed,
            _ => EventKind::TaskCompleted,
        };
        self.events
            .publish(
                Event::new(kind, task_id)
                    .with_group(group)
                    .with_state(outcome),
            )
            .await?;

        info!(group, task_id, state = %outcome, "task finalized");
        Ok(())
    }

    /// Re-queue a task after a failed attempt: remove from `processing`,
    /// re-insert into `order` scored `now + delay_ms`, mark `WAITING`
    /// (or `DELAYED` if `delay_ms > 0`).
    pub async fn requeue_task(&self, group: &str, task_id: &str, delay_ms: u64) -> GroupResult<()> {
        self.store.srem(&keys::processing_key(group), task_id).await?;

        let now = self.store.server_time_millis().await?;
        let score = compose_score(now + delay_ms, 0);
        self.store.zadd(&keys::order_key(group), task_id, score).await?;

        let state = if delay_ms > 0 {
            TaskState::Delayed
        } else {
            TaskState::Waiting
        };
        self.store
            .hset(&keys::state_key(group), task_id, &state.to_string())
            .await?;

        let mut stats = self.get_stats(group).await?;
        stats.active = stats.active.saturating_sub(1);
        self.write_stats(group, stats).await?;

        self.events
            .publish(
                Event::new(EventKind::RetryAttempt, task_id)
                    .with_group(group)
                    .with_state(state),
            )
            .await?;

        debug!(group, task_id, delay_ms, "task requeued");
        Ok(())
    }

    /// Flip every non-terminal, non-active task in `group` to `PAUSED`,
    /// removing it from `order` (so `claim_next` can't dispatch it) while
    /// recording its original score so [`Self::resume_all`] can restore
    /// the same relative position. Returns the number of tasks paused.
    pub async fn pause_all(&self, group: &str) -> GroupResult<usize> {
        let members = self.store.smembers(&keys::membership_key(group)).await?;
        let mut paused = 0usize;

        for task_id in members {
            let current = self
                .store
                .hget(&keys::state_key(group), &task_id)
                .await?
                .and_then(|s| s.parse::<TaskState>().ok())
                .unwrap_or(TaskState::Unknown);

            if !matches!(current, TaskState::Waiting | TaskState::Delayed) {
                continue;
            }

            if let Some(score) = self.store.zscore(&keys::order_key(group), &task_id).await? {
                self.store
                    .hset(&paused_scores_key(group), &task_id, &score.to_string())
                    .await?;
                self.store.zrem(&keys::order_key(group), &task_id).await?;
            }
            self.store
                .hset(&keys::state_key(group), &task_id, &TaskState::Paused.to_string())
                .await?;
            paused += 1;
        }

        if paused > 0 {
            let mut stats = self.get_stats(group).await?;
            stats.paused += paused as u64;
            self.write_stats(group, stats).await?;

            self.events
                .publish(
                    Event::new(EventKind::GroupChange, group)
                        .with_group(group)
                        .with_data(serde_json::json!({"op": "pause_all", "count": paused})),
                )
                .await?;
        }

        info!(group, paused, "pause_all complete");
        Ok(paused)
    }

    /// Flip every `PAUSED` task in `group` back to `WAITING`, reinserting
    /// it into `order` at its recorded pre-pause score.
    pub async fn resume_all(&self, group: &str) -> GroupResult<usize> {
        let members = self.store.smembers(&keys::membership_key(group)).await?;
        let mut resumed = 0usize;

        for task_id in members {
            let current = self
                .store
                .hget(&keys::state_key(group), &task_id)
                .await?
                .and_then(|s| s.parse::<TaskState>().ok())
                .unwrap_or(TaskState::Unknown);

            if current != TaskState::Paused {
                continue;
            }

            let score = self
                .store
                .hget(&paused_scores_key(group), &task_id)
                .await?
                .and_then(|s| s.parse::<f64>().ok());
            let score = match score {
                Some(s) => s,
                None => compose_score(self.store.server_time_millis().await?, 0),
            };

            self.store.zadd(&keys::order_key(group), &task_id, score).await?;
            self.store.hdel(&paused_scores_key(group), &task_id).await?;
            self.store
                .hset(&keys::state_key(group), &task_id, &TaskState::Waiting.to_string())
                .await?;
            resumed += 1;
        }

        if resumed > 0 {
            let mut stats = self.get_stats(group).await?;
            stats.paused = stats.paused.saturating_sub(resumed as u64);
            self.write_stats(group, stats).await?;

            self.events
                .publish(
                    Event::new(EventKind::GroupChange, group)
                        .with_group(group)
                        .with_data(serde_json::json!({"op": "resume_all", "count": resumed})),
                )
                .await?;
        }

        info!(group, resumed, "resume_all complete");
        Ok(resumed)
    }

    /// Cached aggregate counters, recomputed from `perTaskState` if the
    /// cache is cold.
    pub async fn get_stats(&self, group: &str) -> GroupResult<GroupStats> {
        let raw = self.store.hgetall(&keys::stats_key(group)).await?;
        if let Some(stats) = GroupStats::from_fields(&raw) {
            return Ok(stats);
        }

        let mut stats = GroupStats::default();
        let state_map = self.store.hgetall(&keys::state_key(group)).await?;
        for state_str in state_map.values() {
            stats.total += 1;
            match state_str.parse::<TaskState>() {
                Ok(TaskState::Active) => stats.active += 1,
                Ok(TaskState::Completed) => stats.completed += 1,
                Ok(TaskState::Failed) => stats.failed += 1,
                Ok(TaskState::Paused) => stats.paused += 1,
                _ => {}
            }
        }
        self.write_stats(group, stats).await?;
        debug!(group, "recomputed cold stats cache");
        Ok(stats)
    }

    async fn write_stats(&self, group: &str, stats: GroupStats) -> GroupResult<()> {
        for (field, value) in stats.to_fields() {
            self.store.hset(&keys::stats_key(group), field, &value).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_eventbus::StoreEventBus;
    use taskqueue_store::MemoryStore;

    fn manager() -> GroupManager {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let events: Arc<dyn EventBus> = Arc::new(StoreEventBus::new(store.clone()));
        GroupManager::new(store, events)
    }

    #[tokio::test]
    async fn add_task_is_idempotent() {
        let gm = manager();
        gm.add_task("g1", "t1", "default", &TaskOptions::default()).await.unwrap();
        gm.add_task("g1", "t1", "default", &TaskOptions::default()).await.unwrap();

        let stats = gm.get_stats("g1").await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn claim_next_respects_cap_and_fifo_order() {
        let gm = manager();
        gm.set_cap("g1", 1).await.unwrap();
        gm.add_task("g1", "a", "default", &TaskOptions::default()).await.unwrap();
        gm.add_task("g1", "b", "default", &TaskOptions::default()).await.unwrap();

        let (first, _) = gm.claim_next("g1").await.unwrap().unwrap();
        assert_eq!(first, "a");

        // cap is 1 and "a" is still processing; "b" must not be claimable.
        assert!(gm.claim_next("g1").await.unwrap().is_none());

        gm.complete_task("g1", "a", TaskState::Completed).await.unwrap();
        let (second, _) = gm.claim_next("g1").await.unwrap().unwrap();
        assert_eq!(second, "b");
    }

    #[tokio::test]
    async fn requeue_task_marks_delayed_and_reorders() {
        let gm = manager();
        gm.set_cap("g1", 5).await.unwrap();
        gm.add_task("g1", "a", "default", &TaskOptions::default()).await.unwrap();

        let (id, _) = gm.claim_next("g1").await.unwrap().unwrap();
        gm.requeue_task("g1", &id, 50).await.unwrap();

        let stats = gm.get_stats("g1").await.unwrap();
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn pause_then_resume_restores_claimability() {
        let gm = manager();
        gm.set_cap("g1", 5).await.unwrap();
        gm.add_task("g1", "a", "default", &TaskOptions::default()).await.unwrap();

        let paused = gm.pause_all("g1").await.unwrap();
        assert_eq!(paused, 1);
        assert!(gm.claim_next("g1").await.unwrap().is_none());

        let resumed = gm.resume_all("g1").await.unwrap();
        assert_eq!(resumed, 1);
        let (id, _) = gm.claim_next("g1").await.unwrap().unwrap();
        assert_eq!(id, "a");
    }

    #[tokio::test]
    async fn resolve_group_creates_synthetic_group_for_ungrouped_tasks() {
        let gm = manager();
        let resolved = gm.resolve_group(None, "default", 3).await.unwrap();
        assert_eq!(resolved, "__queue__:default");
        assert_eq!(gm.get_cap(&resolved).await.unwrap(), 3);
    }
}
