//! Outbound channels of connected WebSocket clients.
//!
//! Each socket task owns its write half and drains a bounded `mpsc` queue
//! into it. The table keeps the sending side so tasks outside the socket
//! (the session reaper) can push events to a specific client.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Queue depth per connection. A client this far behind has its messages dropped.
pub const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct ConnectionTable {
    senders: Arc<RwLock<HashMap<String, mpsc::Sender<String>>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, client_id: String, sender: mpsc::Sender<String>) {
        self.senders.write().await.insert(client_id, sender);
    }

    pub async fn remove(&self, client_id: &str) {
        self.senders.write().await.remove(client_id);
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.senders.read().await.contains_key(client_id)
    }

    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    /// Queues a message for one client.
    ///
    /// Returns `false` when the client is gone or its queue is full; the
    /// message is dropped in both cases.
    pub async fn send(&self, client_id: &str, message_json: String) -> bool {
        let senders = self.senders.read().await;
        let Some(sender) = senders.get(client_id) else {
            return false;
        };

        match sender.try_send(message_json) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    client_id = %client_id,
                    "dropping message for slow or closed client: {}",
                    e
                );
                false
            }
        }
    }
}
