//! Property-style checks for the store adapter's atomic primitives,
//! kept in a dedicated `tests/` directory separate from the inline
//! `#[cfg(test)]` unit tests for broader invariant/stress coverage.

use proptest::prelude::*;
use std::collections::HashSet;
use taskqueue_store::memory::MemoryStore;
use taskqueue_store::{compose_score, StoreAdapter};

proptest! {
    /// Invariant 2 (group cap): no matter how many members sit in `order`
    /// or how small/large the cap is, `claim_head` never lets
    /// `processing` grow past it.
    #[test]
    fn claim_head_never_exceeds_cap(member_count in 0usize..40, cap in 0usize..10) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryStore::new();
            for i in 0..member_count {
                store.zadd("order", &format!("t{i}"), i as f64).await.unwrap();
            }

            let mut claimed = 0usize;
            loop {
                match store.claim_head("order", "processing", cap).await.unwrap() {
                    Some(_) => claimed += 1,
                    None => break,
                }
                prop_assert!(store.scard("processing").await.unwrap() as usize <= cap);
            }
            prop_assert_eq!(claimed, cap.min(member_count));
            Ok(())
        })?;
    }

    /// Invariant 1 (mutual exclusion per id): under concurrent claimers,
    /// every member of `order` is claimed into `processing` at most once,
    /// regardless of how many members or concurrent claimers there are.
    #[test]
    fn claim_head_hands_out_each_member_at_most_once(member_count in 1usize..30) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryStore::new();
            for i in 0..member_count {
                store.zadd("order", &format!("t{i}"), i as f64).await.unwrap();
            }

            let mut handles = Vec::new();
            for _ in 0..member_count {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store.claim_head("order", "processing", member_count).await.unwrap()
                }));
            }

            let mut seen = HashSet::new();
            for handle in handles {
                if let Some((member, _)) = handle.await.unwrap() {
                    prop_assert!(seen.insert(member), "member claimed more than once");
                }
            }
            prop_assert_eq!(seen.len(), member_count);
            Ok(())
        })?;
    }

    /// `compose_score` is strictly increasing in its sequence argument for
    /// a fixed millisecond, and never decreases when the millisecond
    /// advances — the ordering the Group Manager's arrival clock relies
    /// on for invariant 5 (arrival order within a group).
    #[test]
    fn compose_score_is_monotone(millis in 0u64..1_000_000_000, seq_a in 0u64..900_000, delta in 1u64..900_000) {
        let seq_b = seq_a + delta;
        prop_assume!(seq_b < 1_000_000);
        prop_assert!(compose_score(millis, seq_a) < compose_score(millis, seq_b));
        prop_assert!(compose_score(millis, seq_a) < compose_score(millis + 1, 0));
    }
}
