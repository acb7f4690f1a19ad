//! Recent job outcomes, kept for clients reconciling after a reconnect.
//!
//! Bounded and in memory only. The oldest outcome is evicted first.

use std::collections::{HashMap, VecDeque};

use batchwire_core::{JobFinished, JobOutcome};
use tokio::sync::RwLock;

type Key = (String, String);

#[derive(Default)]
struct LedgerInner {
    outcomes: HashMap<Key, JobOutcome>,
    order: VecDeque<Key>,
}

pub struct OutcomeLedger {
    capacity: usize,
    inner: RwLock<LedgerInner>,
}

impl OutcomeLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    /// Record a fact. Returns `false` if an outcome for that task is already held.
    pub async fn record(&self, fact: &JobFinished) -> bool {
        let key = (fact.owner_id.clone(), fact.task_id.clone());
        let mut inner = self.inner.write().await;
        if inner.outcomes.contains_key(&key) {
            return false;
        }

        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.outcomes.remove(&oldest);
                }
                None => break,
            }
        }

        inner.order.push_back(key.clone());
        inner.outcomes.insert(key, fact.outcome.clone());
        true
    }

    /// Drop the outcome of `task_id`, so a later report for it is recorded again.
    pub async fn forget(&self, owner_id: &str, task_id: &str) {
        let key = (owner_id.to_string(), task_id.to_string());
        let mut inner = self.inner.write().await;
        if inner.outcomes.remove(&key).is_some() {
            inner.order.retain(|k| k != &key);
        }
    }

    /// Outcome of `task_id`, visible only to its owner.
    pub async fn lookup(&self, owner_id: &str, task_id: &str) -> Option<JobOutcome> {
        self.inner
            .read()
            .await
            .outcomes
            .get(&(owner_id.to_string(), task_id.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.outcomes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fact(owner: &str, task: &str) -> JobFinished {
        JobFinished {
            owner_id: owner.into(),
            task_id: task.into(),
            outcome: JobOutcome::Success { result: json!(task) },
        }
    }

    #[tokio::test]
    async fn test_lookup_is_owner_scoped() {
        let ledger = OutcomeLedger::new(8);
        assert!(ledger.record(&fact("u1", "t1")).await);

        assert!(ledger.lookup("u1", "t1").await.is_some());
        assert!(ledger.lookup("u2", "t1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_fact_is_not_recorded_twice() {
        let ledger = OutcomeLedger::new(8);
        assert!(ledger.record(&fact("u1", "t1")).await);
        assert!(!ledger.record(&fact("u1", "t1")).await);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_oldest_outcome_evicted() {
        let ledger = OutcomeLedger::new(2);
        ledger.record(&fact("u1", "t1")).await;
        ledger.record(&fact("u1", "t2")).await;
        ledger.record(&fact("u1", "t3")).await;

        assert!(ledger.lookup("u1", "t1").await.is_none());
        assert!(ledger.lookup("u1", "t2").await.is_some());
        assert!(ledger.lookup("u1", "t3").await.is_some());
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_forgotten_outcome_can_be_recorded_again() {
        let ledger = OutcomeLedger::new(2);
        ledger.record(&fact("u1", "t1")).await;
        ledger.record(&fact("u1", "t2")).await;

        ledger.forget("u1", "t1").await;
        ledger.forget("u2", "t2").await;
        assert!(ledger.lookup("u1", "t1").await.is_none());
        assert_eq!(ledger.len().await, 1);

        assert!(ledger.record(&fact("u1", "t1")).await);
        // t2 is now the oldest entry.
        ledger.record(&fact("u1", "t3")).await;
        assert!(ledger.lookup("u1", "t2").await.is_none());
        assert!(ledger.lookup("u1", "t1").await.is_some());
        assert_eq!(ledger.len().await, 2);
    }
}
