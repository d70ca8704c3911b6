use kamera_protocol::ServerMessage;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queues of every live signaling connection.
///
/// Not synchronized on its own; the relay owns it behind the same lock as
/// the session so routing decisions never see a half-applied disconnect.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Map from connection ID to message sender channel
    senders: HashMap<Uuid, mpsc::UnboundedSender<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connection_id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.senders.insert(connection_id, sender);
        tracing::debug!("Connection {} registered ({} live)", connection_id, self.senders.len());
    }

    pub fn remove(&mut self, connection_id: Uuid) -> bool {
        let removed = self.senders.remove(&connection_id).is_some();
        if removed {
            tracing::debug!("Connection {} removed ({} live)", connection_id, self.senders.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Queue a message for one connection. Returns false on a routing miss.
    pub fn send_to(&self, connection_id: Uuid, message: &ServerMessage) -> bool {
        let Some(json) = encode(message) else {
            return false;
        };

        match self.senders.get(&connection_id) {
            Some(sender) => match sender.send(json) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Failed to send message to {}: {}", connection_id, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Queue a message for every connection except `except`.
    /// Returns the number of connections reached.
    pub fn broadcast(&self, message: &ServerMessage, except: Option<Uuid>) -> usize {
        let Some(json) = encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, sender) in &self.senders {
            if Some(*conn_id) == except {
                continue;
            }
            match sender.send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::error!("Failed to send message to {}: {}", conn_id, e),
            }
        }
        delivered
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(j) => Some(j),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            None
        }
    }
}
