//! Publish/subscribe fan-out to connected clients.
//!
//! Connections and their subscriptions live behind a single lock so that
//! dropping a connection removes every subscription it owns in one step.
//! `publish` only holds the lock long enough to snapshot the subscriber list;
//! delivery uses `try_send`, so a full outbox loses that event instead of
//! stalling the publisher or the other subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::{Connection, SendError};
use super::messages::{msg_types, topics, ServerMessage};
use crate::clock::SharedClock;
use crate::error::ServeError;

pub type ConnectionId = u64;

/// Capacity of each connection's outgoing queue.
const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct Subscription {
    pub connection_id: ConnectionId,
    pub topic: String,
    pub subscribed_at: Instant,
    last_delivered_seq: AtomicU64,
}

impl Subscription {
    /// Highest sequence number delivered through this subscription (0 if none).
    pub fn last_delivered_seq(&self) -> u64 {
        self.last_delivered_seq.load(Ordering::Relaxed)
    }
}

struct ConnectionEntry {
    client_id: String,
    sender: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
    topics: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// topic -> (connection -> subscription)
    topics: HashMap<String, HashMap<ConnectionId, Arc<Subscription>>>,
}

impl HubState {
    fn drop_subscription(&mut self, connection_id: ConnectionId, topic: &str) -> bool {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&connection_id).is_some();
        if subscribers.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }
}

pub struct BroadcastHub {
    state: RwLock<HubState>,
    next_id: AtomicU64,
    clock: SharedClock,
}

impl BroadcastHub {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HubState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection for `client_id`.
    ///
    /// Returns the connection guard and the receiver the transport should
    /// drain into the socket. Dropping the guard unregisters the connection.
    pub fn connect(
        self: &Arc<Self>,
        client_id: &str,
    ) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let cancel = CancellationToken::new();

        self.write().connections.insert(
            id,
            ConnectionEntry {
                client_id: client_id.to_string(),
                sender: tx,
                cancel: cancel.clone(),
                topics: HashSet::new(),
            },
        );
        debug!("Connection {} registered for client {}", id, client_id);

        (
            Connection::new(id, client_id.to_string(), cancel, self.clone()),
            rx,
        )
    }

    /// Removes a connection and all of its subscriptions, and cancels any
    /// reads it has pending. Returns the number of subscriptions dropped.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> usize {
        let mut state = self.write();
        let Some(entry) = state.connections.remove(&connection_id) else {
            return 0;
        };
        entry.cancel.cancel();
        let count = entry.topics.len();
        for topic in &entry.topics {
            state.drop_subscription(connection_id, topic);
        }
        debug!(
            "Connection {} ({}) removed with {} subscriptions",
            connection_id, entry.client_id, count
        );
        count
    }

    pub fn subscribe(&self, connection_id: ConnectionId, topic: &str) -> Result<(), ServeError> {
        let now = self.clock.now();
        let mut state = self.write();
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(ServeError::ConnectionGone)?;
        if !entry.topics.insert(topic.to_string()) {
            return Ok(());
        }
        state.topics.entry(topic.to_string()).or_default().insert(
            connection_id,
            Arc::new(Subscription {
                connection_id,
                topic: topic.to_string(),
                subscribed_at: now,
                last_delivered_seq: AtomicU64::new(0),
            }),
        );
        debug!("Connection {} subscribed to {}", connection_id, topic);
        Ok(())
    }

    /// Returns false if the connection was not subscribed.
    pub fn unsubscribe(&self, connection_id: ConnectionId, topic: &str) -> bool {
        let mut state = self.write();
        if let Some(entry) = state.connections.get_mut(&connection_id) {
            entry.topics.remove(topic);
        }
        state.drop_subscription(connection_id, topic)
    }

    /// Delivers an `event` to every current subscriber of `topic`.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, topic: &str, data: Value) -> usize {
        self.deliver(topic, data, None)
    }

    /// Like [`publish`](Self::publish), for events that carry a stream
    /// sequence number.
    pub fn publish_sequenced(&self, topic: &str, seq: u64, data: Value) -> usize {
        self.deliver(topic, data, Some(seq))
    }

    fn deliver(&self, topic: &str, data: Value, seq: Option<u64>) -> usize {
        let targets: Vec<(Arc<Subscription>, mpsc::Sender<ServerMessage>)> = {
            let state = self.read();
            let Some(subscribers) = state.topics.get(topic) else {
                return 0;
            };
            subscribers
                .iter()
                .filter_map(|(id, sub)| {
                    state
                        .connections
                        .get(id)
                        .map(|entry| (sub.clone(), entry.sender.clone()))
                })
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }

        let message = ServerMessage::new(
            msg_types::EVENT,
            topics::Event {
                topic: topic.to_string(),
                data,
            },
        );

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (subscription, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    if let Some(seq) = seq {
                        subscription
                            .last_delivered_seq
                            .fetch_max(seq, Ordering::Relaxed);
                    }
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Dropping event on {} for slow connection {}",
                        topic, subscription.connection_id
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(subscription.connection_id),
            }
        }

        for connection_id in closed {
            self.remove_connection(connection_id);
        }
        delivered
    }

    /// Queues a direct message (reply, error) for one connection, waiting for
    /// room in its outbox.
    pub async fn send_to(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), SendError> {
        let sender = self
            .read()
            .connections
            .get(&connection_id)
            .map(|entry| entry.sender.clone())
            .ok_or(SendError::NotConnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    pub fn subscription(&self, connection_id: ConnectionId, topic: &str) -> Option<Arc<Subscription>> {
        self.read()
            .topics
            .get(topic)
            .and_then(|subscribers| subscribers.get(&connection_id))
            .cloned()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.read().topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    pub fn topics_of(&self, connection_id: ConnectionId) -> Vec<String> {
        self.read()
            .connections
            .get(&connection_id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.read().connections.contains_key(&connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    /// Number of open connections for one client.
    pub fn client_connection_count(&self, client_id: &str) -> usize {
        self.read()
            .connections
            .values()
            .filter(|entry| entry.client_id == client_id)
            .count()
    }
}
