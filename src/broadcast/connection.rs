//! A live real-time connection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::hub::{BroadcastHub, ConnectionId};
use super::messages::ServerMessage;
use crate::error::ServeError;

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    /// The target connection is not registered.
    NotConnected,
    /// The connection channel is closed (client disconnected).
    Disconnected,
}

/// Registration guard for one connection.
///
/// Dropping it removes the connection from the hub, which unsubscribes it
/// from every topic and fires its cancellation token.
pub struct Connection {
    id: ConnectionId,
    client_id: String,
    cancel: CancellationToken,
    hub: Arc<BroadcastHub>,
}

impl Connection {
    pub(super) fn new(
        id: ConnectionId,
        client_id: String,
        cancel: CancellationToken,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            id,
            client_id,
            cancel,
            hub,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Cancelled when the connection goes away.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn subscribe(&self, topic: &str) -> Result<(), ServeError> {
        self.hub.subscribe(self.id, topic)
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.hub.unsubscribe(self.id, topic)
    }

    pub async fn send(&self, message: ServerMessage) -> Result<(), SendError> {
        self.hub.send_to(self.id, message).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.hub.remove_connection(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::messages::msg_types;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn send_delivers_to_own_receiver() {
        let hub = Arc::new(BroadcastHub::new(Arc::new(ManualClock::new())));
        let (conn, mut rx) = hub.connect("c1");

        conn.send(ServerMessage::new(
            msg_types::PONG,
            serde_json::json!({"timestamp": 5}),
        ))
        .await
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.msg_type, "pong");
        assert_eq!(received.payload["timestamp"], 5);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_reports_disconnected() {
        let hub = Arc::new(BroadcastHub::new(Arc::new(ManualClock::new())));
        let (conn, rx) = hub.connect("c1");
        drop(rx);

        let result = conn.send(ServerMessage::empty("x")).await;
        assert_eq!(result, Err(SendError::Disconnected));
    }

    #[tokio::test]
    async fn connection_ids_are_distinct() {
        let hub = Arc::new(BroadcastHub::new(Arc::new(ManualClock::new())));
        let (a, _rx_a) = hub.connect("c1");
        let (b, _rx_b) = hub.connect("c1");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.client_id(), "c1");
    }
}
