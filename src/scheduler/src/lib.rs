//! Scheduler / Dispatcher — selects the next group a worker slot should
//! draw from, then delegates the actual claim to that group's
//! `claimNext`. Never executes tasks itself.
//!
//! Kept process-local and logically singleton per engine instance:
//! `rrCursor` and the priority credit table live in a mutex here rather
//! than in the store. Running multiple Worker Pool processes against the
//! same store is fine; running more than one `Dispatcher` against the
//! same group set is not.

mod error;
mod policy;

pub use error::{DispatchError, DispatchResult};
pub use policy::DispatchPolicy;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use taskqueue_group::GroupManager;
use tracing::trace;

const DEFAULT_GROUP_WEIGHT: i64 = 1;

/// Chooses which group a worker slot should draw from next, across every
/// group registered for that slot's queue.
pub struct Dispatcher {
    groups: Arc<GroupManager>,
    policy: DispatchPolicy,
    rr_cursor: Mutex<Option<String>>,
    priority_weights: Mutex<HashMap<String, i64>>,
    priority_credits: Mutex<HashMap<String, i64>>,
}

impl Dispatcher {
    pub fn new(groups: Arc<GroupManager>, policy: DispatchPolicy) -> Self {
        Self {
            groups,
            policy,
            rr_cursor: Mutex::new(None),
            priority_weights: Mutex::new(HashMap::new()),
            priority_credits: Mutex::new(HashMap::new()),
        }
    }

    /// Set a group's weight for the `priority` policy (default 1 if never
    /// set).
    pub fn set_group_priority(&self, group: impl Into<String>, weight: i64) {
        self.priority_weights.lock().insert(group.into(), weight);
    }

    fn weight_of(&self, group: &str) -> i64 {
        self.priority_weights
            .lock()
            .get(group)
            .copied()
            .unwrap_or(DEFAULT_GROUP_WEIGHT)
    }

    /// Select, and claim from, the next eligible group for `queue`.
    /// Returns `None` if no group currently has a due, un-capped head.
    /// On success, returns `(group, task_id, queue)` — the group name is
    /// handed back alongside the claim because the Worker Pool needs it
    /// to finalize the task (`complete_task`/`requeue_task` are
    /// per-group operations).
    pub async fn dispatch(&self, queue: &str) -> DispatchResult<Option<(String, String, String)>> {
        let mut groups = self.groups.list_groups_for_queue(queue).await?;
        groups.sort();
        if groups.is_empty() {
            return Ok(None);
        }

        let chosen = match self.policy {
            DispatchPolicy::RoundRobin => self.choose_round_robin(&groups).await?,
            DispatchPolicy::Fifo => self.choose_fifo(&groups).await?,
            DispatchPolicy::Priority => self.choose_priority(&groups).await?,
        };

        let Some(group) = chosen else {
            return Ok(None);
        };

        trace!(queue, group, policy = ?self.policy, "dispatch decision");
        match self.groups.claim_next(&group).await? {
            Some((task_id, task_queue)) => Ok(Some((group, task_id, task_queue))),
            None => Ok(None),
        }
    }

    async fn choose_round_robin(&self, groups: &[String]) -> DispatchResult<Option<String>> {
        let start = {
            let cursor = self.rr_cursor.lock();
            match cursor.as_ref() {
                Some(last) => groups.iter().position(|g| g == last).map(|i| i + 1).unwrap_or(0),
                None => 0,
            }
        };

        for offset in 0..groups.len() {
            let idx = (start + offset) % groups.len();
            let group = &groups[idx];
            if self.groups.eligible_head(group).await?.is_some() {
                *self.rr_cursor.lock() = Some(group.clone());
                return Ok(Some(group.clone()));
            }
        }
        Ok(None)
    }

    async fn choose_fifo(&self, groups: &[String]) -> DispatchResult<Option<String>> {
        let mut best: Option<(String, f64)> = None;
        for group in groups {
            if let Some((_, score)) = self.groups.eligible_head(group).await? {
                best = Some(match best {
                    None => (group.clone(), score),
                    Some((best_group, best_score)) => {
                        if score < best_score || (score == best_score && *group < best_group) {
                            (group.clone(), score)
                        } else {
                            (best_group, best_score)
                        }
                    }
                });
            }
        }
        Ok(best.map(|(group, _)| group))
    }

    async fn choose_priority(&self, groups: &[String]) -> DispatchResult<Option<String>> {
        let mut eligible = Vec::new();
        for group in groups {
            if self.groups.eligible_head(group).await?.is_some() {
                eligible.push(group.clone());
            }
        }
        if eligible.is_empty() {
            return Ok(None);
        }

        let max_weight = eligible.iter().map(|g| self.weight_of(g)).max().unwrap_or(DEFAULT_GROUP_WEIGHT);

        let mut credits = self.priority_credits.lock();
        for group in &eligible {
            let weight = self.weight_of(group);
            *credits.entry(group.clone()).or_insert(0) += weight;
        }

        let winner = eligible
            .iter()
            .max_by(|a, b| {
                let ca = credits.get(*a).copied().unwrap_or(0);
                let cb = credits.get(*b).copied().unwrap_or(0);
                ca.cmp(&cb).then_with(|| b.cmp(a))
            })
            .cloned()
            .expect("eligible is non-empty");

        *credits.entry(winner.clone()).or_insert(0) -= max_weight;
        Ok(Some(winner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use taskqueue_eventbus::{EventBus, StoreEventBus};
    use taskqueue_registry::TaskOptions;
    use taskqueue_store::{MemoryStore, StoreAdapter};

    async fn setup() -> StdArc<GroupManager> {
        let store: StdArc<dyn StoreAdapter> = StdArc::new(MemoryStore::new());
        let events: StdArc<dyn EventBus> = StdArc::new(StoreEventBus::new(store.clone()));
        StdArc::new(GroupManager::new(store, events))
    }

    #[tokio::test]
    async fn round_robin_cycles_through_groups_in_order() {
        let groups = setup().await;
        groups.add_task("b", "t1", "q", &TaskOptions::default()).await.unwrap();
        groups.add_task("a", "t2", "q", &TaskOptions::default()).await.unwrap();

        let dispatcher = Dispatcher::new(groups.clone(), DispatchPolicy::RoundRobin);

        // Lexicographic seed: "a" sorts first and the cursor starts at
        // None, so the first pick is "a".
        let (_, first, _) = dispatcher.dispatch("q").await.unwrap().unwrap();
        assert_eq!(first, "t2");

        let (_, second, _) = dispatcher.dispatch("q").await.unwrap().unwrap();
        assert_eq!(second, "t1");
    }

    #[tokio::test]
    async fn fifo_picks_oldest_head_across_groups() {
        let groups = setup().await;
        groups.add_task("a", "old", "q", &TaskOptions::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        groups.add_task("b", "new", "q", &TaskOptions::default()).await.unwrap();

        let dispatcher = Dispatcher::new(groups, DispatchPolicy::Fifo);
        let (_, task_id, _) = dispatcher.dispatch("q").await.unwrap().unwrap();
        assert_eq!(task_id, "old");
    }

    #[tokio::test]
    async fn priority_policy_favors_heavier_weight_over_time() {
        let groups = setup().await;
        groups.set_cap("vip", 10).await.unwrap();
        groups.set_cap("reg", 10).await.unwrap();
        for i in 0..10 {
            groups.add_task("vip", &format!("v{i}"), "q", &TaskOptions::default()).await.unwrap();
            groups.add_task("reg", &format!("r{i}"), "q", &TaskOptions::default()).await.unwrap();
        }

        let dispatcher = Dispatcher::new(groups, DispatchPolicy::Priority);
        dispatcher.set_group_priority("vip", 10);
        dispatcher.set_group_priority("reg", 1);

        let mut vip_count = 0;
        let mut reg_count = 0;
        for _ in 0..11 {
            let (_, task_id, _) = dispatcher.dispatch("q").await.unwrap().unwrap();
            if task_id.starts_with('v') {
                vip_count += 1;
            } else {
                reg_count += 1;
            }
        }

        assert_eq!(vip_count, 10);
        assert_eq!(reg_count, 1);
    }

    #[tokio::test]
    async fn dispatch_returns_none_when_no_queue_has_registered_groups() {
        let groups = setup().await;
        let dispatcher = Dispatcher::new(groups, DispatchPolicy::RoundRobin);
        assert!(dispatcher.dispatch("nonexistent").await.unwrap().is_none());
    }
}
