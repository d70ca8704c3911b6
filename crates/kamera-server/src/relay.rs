//! Relay coordinator
//!
//! Holds the identity of the current broadcaster and routes signaling
//! messages between connections. No media passes through here. The
//! session and the connection registry sit behind one lock so that a
//! registration and a disconnect can never interleave.

use crate::ws::connections::ConnectionRegistry;
use kamera_protocol::{ClientMessage, IceTarget, ServerMessage};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// The relay's only global state
#[derive(Debug, Default)]
pub struct Session {
    broadcaster_id: Option<Uuid>,
}

impl Session {
    pub fn broadcaster(&self) -> Option<Uuid> {
        self.broadcaster_id
    }

    /// Last writer wins. Returns the superseded broadcaster, if any.
    pub fn set_broadcaster(&mut self, connection_id: Uuid) -> Option<Uuid> {
        self.broadcaster_id.replace(connection_id)
    }

    /// Clear the broadcaster only if it is `connection_id`
    pub fn clear_if(&mut self, connection_id: Uuid) -> bool {
        if self.broadcaster_id == Some(connection_id) {
            self.broadcaster_id = None;
            true
        } else {
            false
        }
    }

    pub fn is_broadcaster(&self, connection_id: Uuid) -> bool {
        self.broadcaster_id == Some(connection_id)
    }
}

#[derive(Default)]
struct RelayState {
    session: Session,
    connections: ConnectionRegistry,
}

#[derive(Default)]
pub struct Relay {
    state: Mutex<RelayState>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn broadcaster(&self) -> Option<Uuid> {
        self.state.lock().await.session.broadcaster()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Register a new signaling connection and greet it
    pub async fn connect(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<String>) {
        let mut state = self.state.lock().await;
        state.connections.add(connection_id, sender);
        state
            .connections
            .send_to(connection_id, &ServerMessage::Welcome { connection_id });
        tracing::info!("[connect] {}", connection_id);
    }

    /// Channel teardown for `connection_id`
    pub async fn disconnect(&self, connection_id: Uuid) {
        let mut state = self.state.lock().await;
        if !state.connections.remove(connection_id) {
            return;
        }
        tracing::info!("[disconnect] {}", connection_id);

        if state.session.clear_if(connection_id) {
            let reached = state
                .connections
                .broadcast(&ServerMessage::BroadcasterLeft, None);
            tracing::info!("[broadcaster] {} left, notified {} clients", connection_id, reached);
        } else if let Some(broadcaster) = state.session.broadcaster() {
            state.connections.send_to(
                broadcaster,
                &ServerMessage::PeerLeft {
                    viewer_id: connection_id,
                },
            );
        }
    }

    /// Reply with an error to a connection that sent something unparseable
    pub async fn reject(&self, connection_id: Uuid, message: String) {
        let state = self.state.lock().await;
        state
            .connections
            .send_to(connection_id, &ServerMessage::Error { message });
    }

    pub async fn handle(&self, sender_id: Uuid, message: ClientMessage) {
        let mut state = self.state.lock().await;
        let RelayState {
            session,
            connections,
        } = &mut *state;

        match message {
            ClientMessage::RegisterBroadcaster => {
                if let Some(previous) = session.set_broadcaster(sender_id) {
                    if previous != sender_id {
                        tracing::warn!("[broadcaster] {} supersedes {}", sender_id, previous);
                    }
                }
                tracing::info!("[broadcaster] {}", sender_id);
                connections.send_to(sender_id, &ServerMessage::BroadcasterRegistered);
                connections.broadcast(&ServerMessage::BroadcasterAvailable, Some(sender_id));
            }
            ClientMessage::RequestOffer => match session.broadcaster() {
                None => {
                    tracing::debug!("[viewer] {} requested offer, nobody broadcasting", sender_id);
                    connections.send_to(sender_id, &ServerMessage::NoBroadcaster);
                }
                Some(broadcaster) => {
                    tracing::info!("[viewer] {} requesting offer from {}", sender_id, broadcaster);
                    connections.send_to(
                        broadcaster,
                        &ServerMessage::PeerJoined {
                            viewer_id: sender_id,
                        },
                    );
                }
            },
            ClientMessage::Offer { viewer_id, sdp } => {
                tracing::debug!("[offer] {} -> {}", sender_id, viewer_id);
                if !connections.send_to(viewer_id, &ServerMessage::Offer { sdp }) {
                    tracing::warn!("[offer] dropped, viewer {} not connected", viewer_id);
                }
            }
            ClientMessage::Answer { sdp } => {
                let Some(broadcaster) = viewer_route(session, sender_id, "answer") else {
                    return;
                };
                tracing::debug!("[answer] {} -> {}", sender_id, broadcaster);
                connections.send_to(
                    broadcaster,
                    &ServerMessage::Answer {
                        viewer_id: sender_id,
                        sdp,
                    },
                );
            }
            ClientMessage::IceCandidate { candidate, target } => {
                let resolved = match target {
                    IceTarget::Broadcaster => session.broadcaster(),
                    IceTarget::Peer(id) => Some(id),
                };
                let delivered = resolved.is_some_and(|to| {
                    connections.send_to(
                        to,
                        &ServerMessage::IceCandidate {
                            candidate,
                            from: sender_id,
                        },
                    )
                });
                if !delivered {
                    tracing::debug!("[ice] dropped candidate from {} for {}", sender_id, target);
                }
            }
            ClientMessage::DeviceSwitchRequest => {
                if let Some(broadcaster) = viewer_route(session, sender_id, "device-switch") {
                    tracing::info!("[device-switch] {} -> {}", sender_id, broadcaster);
                    connections.send_to(broadcaster, &ServerMessage::DeviceSwitchRequest);
                }
            }
            ClientMessage::ModeSwitchRequest { low_light } => {
                if let Some(broadcaster) = viewer_route(session, sender_id, "mode-switch") {
                    tracing::info!("[mode-switch] {} -> {}", sender_id, broadcaster);
                    connections.send_to(broadcaster, &ServerMessage::ModeSwitchRequest { low_light });
                }
            }
            ClientMessage::Ping => {
                connections.send_to(sender_id, &ServerMessage::Pong);
            }
        }
    }
}

/// Resolve the broadcaster for a viewer-only message
fn viewer_route(session: &Session, sender_id: Uuid, kind: &str) -> Option<Uuid> {
    if session.is_broadcaster(sender_id) {
        tracing::warn!("[{}] ignored, sent by the broadcaster itself", kind);
        return None;
    }
    let broadcaster = session.broadcaster();
    if broadcaster.is_none() {
        tracing::debug!("[{}] dropped from {}, nobody broadcasting", kind, sender_id);
    }
    broadcaster
}
