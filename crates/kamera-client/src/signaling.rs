use futures_util::{SinkExt, StreamExt};
use kamera_protocol::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::error::ClientError;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound half of the signaling channel.
///
/// Inbound messages arrive on the receiver returned by [`SignalingClient::connect`];
/// it yields `None` once the relay connection is gone. Dropping the last
/// clone closes the connection.
#[derive(Clone)]
pub struct SignalingClient {
    sender: mpsc::Sender<ClientMessage>,
}

impl SignalingClient {
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, Uuid, mpsc::Receiver<ServerMessage>), ClientError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Signaling(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // The relay greets every connection before anything else
        let connection_id = match read.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Welcome { connection_id }) => connection_id,
                Ok(other) => {
                    return Err(ClientError::Signaling(format!(
                        "Unexpected greeting: {:?}",
                        other
                    )));
                }
                Err(e) => return Err(ClientError::Signaling(e.to_string())),
            },
            _ => return Err(ClientError::SignalingClosed),
        };
        tracing::info!("Connected to relay as {}", connection_id);

        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(100);

        // Outgoing messages and keepalive. Once every client clone is
        // dropped the queue ends and the socket is closed.
        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval_at(
                tokio::time::Instant::now() + PING_INTERVAL,
                PING_INTERVAL,
            );
            loop {
                let msg = tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = keepalive.tick() => ClientMessage::Ping,
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send signaling message");
                    return;
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("Signaling close failed: {}", e);
            }
            tracing::info!("Signaling channel closed");
        });

        // Incoming messages
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Pong) => {}
                        Ok(msg) => {
                            if inbound_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring unparseable relay message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling channel closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Signaling channel error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok((Self { sender: tx }, connection_id, inbound_rx))
    }

    /// Wrap an existing outbound queue
    pub fn from_sender(sender: mpsc::Sender<ClientMessage>) -> Self {
        Self { sender }
    }

    /// Close the connection unless other clones are still alive
    pub fn close(self) {
        drop(self.sender);
    }

    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ClientError::SignalingClosed)
    }
}
