//! Event bridge: turns "job finished" facts into owner-addressed task events.

use std::sync::Arc;

use batchwire_core::{JobFinished, TaskEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::broker::ConnectionBroker;

/// Queue feeding facts into a running bridge.
pub type FactSender = mpsc::Sender<JobFinished>;

/// Default length of the fact queue.
pub const DEFAULT_FACT_CAPACITY: usize = 256;

/// Relays worker facts to the broker. Pure translation, no policy.
#[derive(Clone)]
pub struct EventBridge {
    broker: Arc<ConnectionBroker>,
}

impl EventBridge {
    pub fn new(broker: Arc<ConnectionBroker>) -> Self {
        Self { broker }
    }

    /// Publish one fact to its owner. Returns the number of connections reached.
    pub async fn relay(&self, fact: &JobFinished) -> usize {
        let delivered = self
            .broker
            .publish(&fact.owner_id, TaskEvent::from(fact))
            .await;
        debug!(
            owner_id = %fact.owner_id,
            task_id = %fact.task_id,
            delivered,
            "Relayed job outcome"
        );
        delivered
    }

    /// Run the bridge over a fact queue until every sender is dropped.
    pub fn spawn(self, capacity: usize) -> (FactSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<JobFinished>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(fact) = rx.recv().await {
                self.relay(&fact).await;
            }
            info!("Event bridge stopped");
        });
        (tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchwire_core::{ErrorKind, JobOutcome, ServerMessage, TaskStatus};

    #[tokio::test]
    async fn test_relay_translates_failure() {
        let broker = Arc::new(ConnectionBroker::default());
        let (ctx, mut rx) = broker.connect("u1").await;
        broker.bind(&ctx, "u1").await.unwrap();
        let bridge = EventBridge::new(Arc::clone(&broker));

        let delivered = bridge
            .relay(&JobFinished {
                owner_id: "u1".into(),
                task_id: "t1".into(),
                outcome: JobOutcome::Failure {
                    message: "parser crashed".into(),
                    kind: ErrorKind::Server,
                },
            })
            .await;

        assert_eq!(delivered, 1);
        match rx.try_recv().unwrap() {
            ServerMessage::Task(ev) => {
                assert_eq!(ev.status, TaskStatus::Error);
                assert_eq!(ev.error_kind, Some(ErrorKind::Server));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_owner_drops_fact() {
        let broker = Arc::new(ConnectionBroker::default());
        let bridge = EventBridge::new(broker);

        let delivered = bridge
            .relay(&JobFinished {
                owner_id: "offline".into(),
                task_id: "t1".into(),
                outcome: JobOutcome::Success { result: serde_json::json!({}) },
            })
            .await;

        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_spawned_bridge_drains_queue() {
        let broker = Arc::new(ConnectionBroker::default());
        let (ctx, mut rx) = broker.connect("u1").await;
        broker.bind(&ctx, "u1").await.unwrap();

        let (tx, handle) = EventBridge::new(Arc::clone(&broker)).spawn(8);
        for i in 0..3 {
            tx.send(JobFinished {
                owner_id: "u1".into(),
                task_id: format!("t{i}"),
                outcome: JobOutcome::Success { result: serde_json::json!(i) },
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let mut ids = Vec::new();
        while let Ok(ServerMessage::Task(ev)) = rx.try_recv() {
            ids.push(ev.task_id);
        }
        assert_eq!(ids, vec!["t0", "t1", "t2"]);
    }
}
