use kamera_protocol::PeerState;
use std::sync::Arc;
use uuid::Uuid;

use crate::transport::PeerTransport;

/// One negotiation attempt with one remote peer.
///
/// Remote candidates that arrive before the remote description is applied
/// are held here and flushed once it is.
pub(crate) struct PeerSession {
    pub id: Uuid,
    pub label: String,
    pub state: PeerState,
    transport: Option<Arc<dyn PeerTransport>>,
    remote_applied: bool,
    pending_candidates: Vec<String>,
}

impl PeerSession {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            state: PeerState::AwaitingRemote,
            transport: None,
            remote_applied: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn transition(&mut self, next: PeerState) {
        if self.state != next {
            tracing::info!("Peer {}: {:?} -> {:?}", self.label, self.state, next);
            self.state = next;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.transport.clone()
    }

    pub fn attach(&mut self, transport: Arc<dyn PeerTransport>) {
        self.transport = Some(transport);
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    /// Remote description is in place; apply whatever was held back
    pub fn mark_remote_applied(&mut self) {
        self.remote_applied = true;
        let pending = std::mem::take(&mut self.pending_candidates);
        if let Some(transport) = &self.transport {
            if !pending.is_empty() {
                tracing::debug!(
                    "Flushing {} early candidates for {}",
                    pending.len(),
                    self.label
                );
                apply_candidates(self.label.clone(), transport.clone(), pending);
            }
        }
    }

    pub fn on_remote_candidate(&mut self, candidate: String) {
        match &self.transport {
            Some(transport) if self.remote_applied => {
                apply_candidates(self.label.clone(), transport.clone(), vec![candidate]);
            }
            _ => self.pending_candidates.push(candidate),
        }
    }

    /// Tear down. The session is unusable afterwards.
    pub fn close(&mut self) {
        self.transition(PeerState::Closed);
        self.pending_candidates.clear();
        if let Some(transport) = self.transport.take() {
            tokio::spawn(async move { transport.close().await });
        }
    }
}

fn apply_candidates(label: String, transport: Arc<dyn PeerTransport>, candidates: Vec<String>) {
    tokio::spawn(async move {
        for candidate in candidates {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                tracing::debug!("Ignoring ICE candidate for {}: {}", label, e);
            }
        }
    });
}
