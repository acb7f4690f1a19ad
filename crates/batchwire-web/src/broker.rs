//! Connection broker.
//!
//! Tracks live connections and which user each one is bound to, and fans
//! task events out to every connection of the addressed user. Delivery is
//! best-effort: nothing is queued for users without a bound connection.
//!
//! Lock order is always `connections` before `rooms`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use batchwire_core::{ServerMessage, TaskEvent};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Default per-connection outbound queue length.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Broker errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("connection authenticated as '{identity}' cannot bind to '{requested}'")]
    IdentityMismatch { identity: String, requested: String },

    #[error("unknown connection: {0}")]
    UnknownConnection(String),
}

/// Identity of a live connection, as established by the server at connect time.
///
/// Only [`ConnectionBroker::connect`] creates these, so the identity a bind
/// is checked against never comes from a client-supplied field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    connection_id: String,
    identity: String,
}

impl AuthContext {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    pub outbound_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

struct ConnectionEntry {
    identity: String,
    owner: Option<String>,
    sender: mpsc::Sender<ServerMessage>,
}

/// Owner-scoped event fan-out.
pub struct ConnectionBroker {
    config: BrokerConfig,
    conn_counter: AtomicU64,
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    rooms: RwLock<HashMap<String, HashSet<String>>>,
}

impl ConnectionBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    /// Register a new, unbound connection for an authenticated identity.
    ///
    /// Returns the connection's context and the receiving end of its
    /// outbound queue.
    pub async fn connect(&self, identity: &str) -> (AuthContext, mpsc::Receiver<ServerMessage>) {
        let (sender, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let ctx = AuthContext {
            connection_id: self.next_conn_id(),
            identity: identity.to_string(),
        };

        self.connections.write().await.insert(
            ctx.connection_id.clone(),
            ConnectionEntry {
                identity: identity.to_string(),
                owner: None,
                sender,
            },
        );

        info!(conn_id = %ctx.connection_id, identity, "Connection registered");
        (ctx, rx)
    }

    /// Bind a connection to `owner_id` so it receives that user's events.
    ///
    /// Succeeds only when `owner_id` is the identity the connection was
    /// authenticated as. Rejections leave membership untouched.
    pub async fn bind(&self, ctx: &AuthContext, owner_id: &str) -> Result<(), BrokerError> {
        if owner_id != ctx.identity {
            warn!(
                conn_id = %ctx.connection_id,
                identity = %ctx.identity,
                requested = owner_id,
                "Rejected bind to foreign identity"
            );
            return Err(BrokerError::IdentityMismatch {
                identity: ctx.identity.clone(),
                requested: owner_id.to_string(),
            });
        }

        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(&ctx.connection_id)
            .ok_or_else(|| BrokerError::UnknownConnection(ctx.connection_id.clone()))?;

        if entry.identity != ctx.identity {
            return Err(BrokerError::IdentityMismatch {
                identity: entry.identity.clone(),
                requested: owner_id.to_string(),
            });
        }

        if entry.owner.as_deref() == Some(owner_id) {
            return Ok(());
        }

        let mut rooms = self.rooms.write().await;
        if let Some(previous) = entry.owner.replace(owner_id.to_string()) {
            remove_member(&mut rooms, &previous, &ctx.connection_id);
        }
        rooms
            .entry(owner_id.to_string())
            .or_default()
            .insert(ctx.connection_id.clone());

        info!(conn_id = %ctx.connection_id, owner_id, "Connection bound");
        Ok(())
    }

    /// Forget a connection and its room membership. Safe to call repeatedly.
    ///
    /// Returns whether the connection was still registered.
    pub async fn unbind(&self, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let Some(entry) = connections.remove(connection_id) else {
            return false;
        };

        if let Some(owner) = entry.owner {
            let mut rooms = self.rooms.write().await;
            remove_member(&mut rooms, &owner, connection_id);
        }

        info!(conn_id = connection_id, "Connection unbound");
        true
    }

    /// Deliver an event to every connection bound to `owner_id`.
    ///
    /// Never waits on a connection: a full queue makes that connection miss
    /// this event, a closed queue unbinds it. Returns the number of
    /// connections the event was queued for.
    pub async fn publish(&self, owner_id: &str, event: TaskEvent) -> usize {
        let targets: Vec<(String, mpsc::Sender<ServerMessage>)> = {
            let connections = self.connections.read().await;
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(owner_id) else {
                debug!(owner_id, task_id = %event.task_id, "No bound connections, event dropped");
                return 0;
            };
            members
                .iter()
                .filter_map(|id| connections.get(id).map(|c| (id.clone(), c.sender.clone())))
                .collect()
        };

        let msg = ServerMessage::Task(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (conn_id, sender) in targets {
            match sender.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(conn_id = %conn_id, owner_id, "Slow consumer, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(conn_id),
            }
        }

        for conn_id in closed {
            self.unbind(&conn_id).await;
        }

        debug!(owner_id, delivered, "Event published");
        delivered
    }

    /// Queue a message for one connection, bound or not.
    pub async fn send_to(&self, connection_id: &str, msg: ServerMessage) -> bool {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(connection_id).map(|c| c.sender.clone())
        };
        let Some(sender) = sender else {
            return false;
        };

        match sender.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = connection_id, "Outbound queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unbind(connection_id).await;
                false
            }
        }
    }

    /// The owner a connection is bound to, if any.
    pub async fn bound_owner(&self, connection_id: &str) -> Option<String> {
        self.connections
            .read()
            .await
            .get(connection_id)
            .and_then(|c| c.owner.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections bound to `owner_id`.
    pub async fn room_size(&self, owner_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(owner_id)
            .map_or(0, HashSet::len)
    }
}

impl Default for ConnectionBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

fn remove_member(rooms: &mut HashMap<String, HashSet<String>>, owner: &str, connection_id: &str) {
    if let Some(set) = rooms.get_mut(owner) {
        set.remove(connection_id);
        if set.is_empty() {
            rooms.remove(owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchwire_core::TaskStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn event(task_id: &str) -> TaskEvent {
        TaskEvent {
            task_id: task_id.to_string(),
            status: TaskStatus::Success,
            result: Some(json!({"ok": true})),
            error: None,
            error_kind: None,
        }
    }

    fn received_task(rx: &mut mpsc::Receiver<ServerMessage>) -> Option<String> {
        match rx.try_recv() {
            Ok(ServerMessage::Task(ev)) => Some(ev.task_id),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_connection_of_owner_only() {
        let broker = ConnectionBroker::default();
        let (c1, mut rx1) = broker.connect("u1").await;
        let (c2, mut rx2) = broker.connect("u1").await;
        let (c3, mut rx3) = broker.connect("u2").await;
        broker.bind(&c1, "u1").await.unwrap();
        broker.bind(&c2, "u1").await.unwrap();
        broker.bind(&c3, "u2").await.unwrap();

        let delivered = broker.publish("u1", event("t1")).await;

        assert_eq!(delivered, 2);
        assert_eq!(received_task(&mut rx1).as_deref(), Some("t1"));
        assert_eq!(received_task(&mut rx2).as_deref(), Some("t1"));
        assert_eq!(received_task(&mut rx3), None);
    }

    #[tokio::test]
    async fn test_unbound_connection_receives_nothing() {
        let broker = ConnectionBroker::default();
        let (_c1, mut rx1) = broker.connect("u1").await;

        assert_eq!(broker.publish("u1", event("t1")).await, 0);
        assert_eq!(received_task(&mut rx1), None);
    }

    #[tokio::test]
    async fn test_unbind_stops_delivery_and_is_idempotent() {
        let broker = ConnectionBroker::default();
        let (c1, mut rx1) = broker.connect("u1").await;
        let (c2, mut rx2) = broker.connect("u1").await;
        broker.bind(&c1, "u1").await.unwrap();
        broker.bind(&c2, "u1").await.unwrap();

        assert!(broker.unbind(c1.connection_id()).await);
        assert!(!broker.unbind(c1.connection_id()).await);

        assert_eq!(broker.publish("u1", event("t2")).await, 1);
        assert_eq!(received_task(&mut rx1), None);
        assert_eq!(received_task(&mut rx2).as_deref(), Some("t2"));
        assert_eq!(broker.room_size("u1").await, 1);

        broker.unbind(c2.connection_id()).await;
        assert_eq!(broker.room_size("u1").await, 0);
        assert_eq!(broker.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_bind_to_foreign_identity_is_rejected() {
        let broker = ConnectionBroker::default();
        let (mallory, mut rx) = broker.connect("mallory").await;

        let err = broker.bind(&mallory, "alice").await.unwrap_err();

        assert_eq!(
            err,
            BrokerError::IdentityMismatch { identity: "mallory".into(), requested: "alice".into() }
        );
        assert_eq!(broker.room_size("alice").await, 0);
        assert_eq!(broker.bound_owner(mallory.connection_id()).await, None);

        broker.publish("alice", event("secret")).await;
        assert_eq!(received_task(&mut rx), None);
    }

    #[tokio::test]
    async fn test_bind_after_disconnect_fails() {
        let broker = ConnectionBroker::default();
        let (c1, _rx) = broker.connect("u1").await;
        broker.unbind(c1.connection_id()).await;

        assert!(matches!(broker.bind(&c1, "u1").await, Err(BrokerError::UnknownConnection(_))));
        assert_eq!(broker.room_size("u1").await, 0);
    }

    #[tokio::test]
    async fn test_context_from_other_broker_cannot_bind() {
        let a = ConnectionBroker::default();
        let b = ConnectionBroker::default();
        let (ctx_a, _rx_a) = a.connect("u1").await;
        let (_ctx_b, _rx_b) = b.connect("u2").await;

        // Same counter value, different identity behind it.
        assert_eq!(ctx_a.connection_id(), "conn-1");
        assert!(matches!(b.bind(&ctx_a, "u1").await, Err(BrokerError::IdentityMismatch { .. })));
        assert_eq!(b.room_size("u1").await, 0);
    }

    #[tokio::test]
    async fn test_rebind_same_owner_is_idempotent() {
        let broker = ConnectionBroker::default();
        let (c1, mut rx1) = broker.connect("u1").await;
        broker.bind(&c1, "u1").await.unwrap();
        broker.bind(&c1, "u1").await.unwrap();

        assert_eq!(broker.room_size("u1").await, 1);
        assert_eq!(broker.publish("u1", event("t1")).await, 1);
        assert_eq!(received_task(&mut rx1).as_deref(), Some("t1"));
        assert_eq!(received_task(&mut rx1), None);
    }

    #[tokio::test]
    async fn test_slow_connection_does_not_block_others() {
        let broker = ConnectionBroker::new(BrokerConfig { outbound_capacity: 1 });
        let (slow, mut slow_rx) = broker.connect("u1").await;
        let (fast, mut fast_rx) = broker.connect("u1").await;
        broker.bind(&slow, "u1").await.unwrap();
        broker.bind(&fast, "u1").await.unwrap();

        assert_eq!(broker.publish("u1", event("t1")).await, 2);
        assert_eq!(received_task(&mut fast_rx).as_deref(), Some("t1"));

        assert_eq!(broker.publish("u1", event("t2")).await, 1);
        assert_eq!(received_task(&mut fast_rx).as_deref(), Some("t2"));

        assert_eq!(received_task(&mut slow_rx).as_deref(), Some("t1"));
        assert_eq!(received_task(&mut slow_rx), None);
        assert_eq!(broker.room_size("u1").await, 2);
    }

    #[tokio::test]
    async fn test_closed_connection_is_unbound_on_publish() {
        let broker = ConnectionBroker::default();
        let (gone, gone_rx) = broker.connect("u1").await;
        let (live, mut live_rx) = broker.connect("u1").await;
        broker.bind(&gone, "u1").await.unwrap();
        broker.bind(&live, "u1").await.unwrap();
        drop(gone_rx);

        assert_eq!(broker.publish("u1", event("t1")).await, 1);
        assert_eq!(received_task(&mut live_rx).as_deref(), Some("t1"));
        assert_eq!(broker.room_size("u1").await, 1);
        assert_eq!(broker.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let broker = ConnectionBroker::default();
        let (c1, mut rx1) = broker.connect("u1").await;

        assert!(
            broker
                .send_to(c1.connection_id(), ServerMessage::Bound { owner_id: "u1".into() })
                .await
        );
        assert_eq!(rx1.try_recv().unwrap(), ServerMessage::Bound { owner_id: "u1".into() });
        assert!(!broker.send_to("conn-404", ServerMessage::Bound { owner_id: "x".into() }).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connect_bind_publish() {
        let broker = Arc::new(ConnectionBroker::default());
        let mut handles = Vec::new();

        for i in 0..32 {
            let broker = Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                let owner = format!("u{}", i % 4);
                let (ctx, rx) = broker.connect(&owner).await;
                broker.bind(&ctx, &owner).await.unwrap();
                broker.publish(&owner, event(&format!("t{i}"))).await;
                (ctx, rx)
            }));
        }

        let mut contexts = Vec::new();
        for handle in handles {
            contexts.push(handle.await.unwrap());
        }

        assert_eq!(broker.connection_count().await, 32);
        for owner in ["u0", "u1", "u2", "u3"] {
            assert_eq!(broker.room_size(owner).await, 8);
        }

        for (ctx, _rx) in &contexts {
            broker.unbind(ctx.connection_id()).await;
        }
        assert_eq!(broker.connection_count().await, 0);
        assert_eq!(broker.room_size("u0").await, 0);
    }
}
