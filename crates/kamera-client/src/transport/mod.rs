//! Peer transport seam
//!
//! A [`PeerTransport`] is one negotiated media connection. Negotiation
//! payloads (SDP, candidates) are opaque strings here; the controllers only
//! relay them.

pub mod rtc;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use kamera_media::{LocalTrack, VideoSender};
use kamera_protocol::Connectivity;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use rtc::RtcTransportFactory;

/// Something a transport reports without being asked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate to trickle to the remote side
    LocalCandidate(String),
    Connectivity(Connectivity),
}

/// A [`PeerEvent`] tagged with the peer session that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: Uuid,
    pub event: PeerEvent,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait PeerTransport: VideoSender {
    /// Build an offer carrying the tracks given at creation
    async fn create_offer(&self) -> anyhow::Result<String>;

    /// Apply a remote offer and produce the answer
    async fn accept_offer(&self, sdp: String) -> anyhow::Result<String>;

    async fn apply_answer(&self, sdp: String) -> anyhow::Result<()>;

    async fn add_ice_candidate(&self, candidate: String) -> anyhow::Result<()>;

    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a transport for one peer session. Every event it reports is
    /// tagged with `session`.
    async fn create(
        &self,
        session: Uuid,
        label: String,
        tracks: Vec<LocalTrack>,
        events: TransportEventSender,
    ) -> anyhow::Result<Arc<dyn PeerTransport>>;
}
