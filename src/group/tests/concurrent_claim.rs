//! End-to-end concurrency scenario: many concurrent callers racing
//! `claim_next` against a single task must hand it to exactly one of
//! them.

use std::sync::Arc;
use taskqueue_eventbus::{EventBus, StoreEventBus};
use taskqueue_group::GroupManager;
use taskqueue_registry::TaskOptions;
use taskqueue_store::{MemoryStore, StoreAdapter};

#[tokio::test]
async fn fifty_concurrent_claimers_yield_exactly_one_winner() {
    let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
    let events: Arc<dyn EventBus> = Arc::new(StoreEventBus::new(store.clone()));
    let groups = Arc::new(GroupManager::new(store, events));

    groups.set_cap("g1", 1).await.unwrap();
    groups.add_task("g1", "only", "default", &TaskOptions::default()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let groups = groups.clone();
        handles.push(tokio::spawn(async move { groups.claim_next("g1").await.unwrap() }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one caller should have claimed the task");
    assert_eq!(groups.processing_count("g1").await.unwrap(), 1);
}
