//! Task Registry — the canonical store of task records. The registry
//! never interprets `state`; it merely stores it. All state-machine
//! enforcement lives in `taskqueue-group` and `taskqueue-workers`.

mod error;
mod types;

pub use error::{RegistryError, RegistryResult};
pub use types::{Priority, Task, TaskId, TaskOptions, TaskState};

use std::sync::Arc;
use taskqueue_store::StoreAdapter;
use tracing::{debug, info};

/// Whether [`Registry::put`] should reject an existing id or silently
/// replace it. Kept as an explicit mode rather than two methods so the
/// duplicate-id check and the write share one code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    Insert,
    Replace,
}

/// A filter applied by [`Registry::list`]. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<TaskState>,
    pub group: Option<String>,
}

fn task_key(id: &str) -> String {
    format!("task:{id}")
}

fn queue_index_key(queue: &str) -> String {
    format!("registry:queue:{queue}")
}

/// The Task Registry: a thin, store-backed CRUD layer over [`Task`]
/// records.
pub struct Registry {
    store: Arc<dyn StoreAdapter>,
}

impl Registry {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }

    /// Insert or replace the full task record, per `mode`.
    pub async fn put(&self, task: &Task, mode: PutMode) -> RegistryResult<()> {
        let key = task_key(&task.id);

        if mode == PutMode::Insert && self.store.get(&key).await?.is_some() {
            return Err(RegistryError::DuplicateId(task.id.clone()));
        }

        let serialized = serde_json::to_string(task).map_err(taskqueue_store::StoreError::from)?;
        self.store.set(&key, &serialized).await?;
        self.store
            .sadd(&queue_index_key(&task.queue), &task.id)
            .await?;

        info!(task_id = %task.id, method = %task.method, mode = ?mode, "registry put");
        Ok(())
    }

    /// Look up a task by id. `queue_hint` is accepted as an optimization
    /// hook but unused: every task is addressable directly by id.
    pub async fn get(&self, id: &str, _queue_hint: Option<&str>) -> RegistryResult<Option<Task>> {
        let Some(raw) = self.store.get(&task_key(id)).await? else {
            return Ok(None);
        };
        let task: Task =
            serde_json::from_str(&raw).map_err(|e| RegistryError::Corrupt(e.to_string()))?;
        Ok(Some(task))
    }

    /// Atomic full replacement of an existing record. Callers (the Group
    /// Manager) are responsible for arbitrating concurrent updates; the
    /// registry itself applies last-writer-wins.
    pub async fn update(&self, task: &Task) -> RegistryResult<()> {
        let key = task_key(&task.id);
        if self.store.get(&key).await?.is_none() {
            return Err(RegistryError::NotFound(task.id.clone()));
        }
        let serialized = serde_json::to_string(task).map_err(taskqueue_store::StoreError::from)?;
        self.store.set(&key, &serialized).await?;
        debug!(task_id = %task.id, state = %task.state, attempts = task.attempts, "registry update");
        Ok(())
    }

    /// Enumerate tasks in `queue` matching `filter`. Used only for
    /// observability — the scheduling hot path never calls this.
    pub async fn list(&self, queue: &str, filter: ListFilter) -> RegistryResult<Vec<Task>> {
        let ids = self.store.smembers(&queue_index_key(queue)).await?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(task) = self.get(&id, Some(queue)).await? {
                if let Some(state) = filter.state {
                    if task.state != state {
                        continue;
                    }
                }
                if let Some(ref group) = filter.group {
                    if task.group.as_deref() != Some(group.as_str()) {
                        continue;
                    }
                }
                out.push(task);
            }
        }
        debug!(queue, count = out.len(), "registry list");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_store::MemoryStore;

    fn sample_task(id: &str) -> Task {
        Task::new(id, "default", "noop", vec![1, 2, 3], None, TaskOptions::default())
    }

    #[tokio::test]
    async fn put_insert_rejects_duplicate_id() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let task = sample_task("t1");
        registry.put(&task, PutMode::Insert).await.unwrap();

        let err = registry.put(&task, PutMode::Insert).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(id) if id == "t1"));
    }

    #[tokio::test]
    async fn put_replace_overwrites_existing_record() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let mut task = sample_task("t1");
        registry.put(&task, PutMode::Insert).await.unwrap();

        task.attempts = 2;
        registry.put(&task, PutMode::Replace).await.unwrap();

        let fetched = registry.get("t1", None).await.unwrap().unwrap();
        assert_eq!(fetched.attempts, 2);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        assert!(registry.get("missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let task = sample_task("ghost");
        let err = registry.update(&task).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn list_filters_by_state_and_group() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));

        let mut a = sample_task("a");
        a.group = Some("g1".to_string());
        registry.put(&a, PutMode::Insert).await.unwrap();

        let mut b = sample_task("b");
        b.group = Some("g2".to_string());
        b.state = TaskState::Completed;
        registry.put(&b, PutMode::Insert).await.unwrap();

        let all = registry.list("default", ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let g1_only = registry
            .list(
                "default",
                ListFilter {
                    group: Some("g1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(g1_only.len(), 1);
        assert_eq!(g1_only[0].id, "a");

        let completed_only = registry
            .list(
                "default",
                ListFilter {
                    state: Some(TaskState::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed_only.len(), 1);
        assert_eq!(completed_only[0].id, "b");
    }
}
