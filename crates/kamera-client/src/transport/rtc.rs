//! webrtc-rs backed peer transport

use async_trait::async_trait;
use kamera_media::{LocalTrack, VideoSender};
use kamera_protocol::Connectivity;
use std::sync::Arc;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use super::{PeerEvent, PeerTransport, TransportEvent, TransportEventSender, TransportFactory};

pub struct RtcTransportFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> anyhow::Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        session: Uuid,
        label: String,
        tracks: Vec<LocalTrack>,
        events: TransportEventSender,
    ) -> anyhow::Result<Arc<dyn PeerTransport>> {
        let peer_connection = Arc::new(self.api.new_peer_connection(self.configuration()).await?);

        let mut video_sender = None;
        for track in tracks {
            let kind = track.kind();
            let sender = peer_connection.add_track(track).await?;
            if kind == RTPCodecType::Video {
                video_sender = Some(sender);
            }
        }

        let ice_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json().map(|init| serde_json::to_string(&init)) {
                    Ok(Ok(json)) => {
                        let _ = tx.send(TransportEvent {
                            session,
                            event: PeerEvent::LocalCandidate(json),
                        });
                    }
                    Ok(Err(e)) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                    Err(e) => tracing::warn!("Failed to read local ICE candidate: {}", e),
                }
            })
        }));

        let state_tx = events;
        let state_label = label.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                tracing::debug!("ICE state for {}: {}", state_label, state);
                if let Some(signal) = connectivity(state) {
                    let _ = state_tx.send(TransportEvent {
                        session,
                        event: PeerEvent::Connectivity(signal),
                    });
                }
                Box::pin(async {})
            },
        ));

        let track_label = label.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::info!(
                "Receiving {} track {} from {}",
                track.kind(),
                track.id(),
                track_label
            );
            Box::pin(async move {
                // No renderer here; keep the receive buffers moving
                tokio::spawn(async move {
                    let mut packets: u64 = 0;
                    while track.read_rtp().await.is_ok() {
                        packets += 1;
                    }
                    tracing::debug!("Remote track {} ended after {} packets", track.id(), packets);
                });
            })
        }));

        Ok(Arc::new(RtcTransport {
            label,
            peer_connection,
            video_sender,
        }))
    }
}

fn connectivity(state: RTCIceConnectionState) -> Option<Connectivity> {
    match state {
        RTCIceConnectionState::New => Some(Connectivity::New),
        RTCIceConnectionState::Checking => Some(Connectivity::Checking),
        RTCIceConnectionState::Connected => Some(Connectivity::Connected),
        RTCIceConnectionState::Completed => Some(Connectivity::Completed),
        RTCIceConnectionState::Disconnected => Some(Connectivity::Disconnected),
        RTCIceConnectionState::Failed => Some(Connectivity::Failed),
        RTCIceConnectionState::Closed => Some(Connectivity::Closed),
        _ => None,
    }
}

struct RtcTransport {
    label: String,
    peer_connection: Arc<RTCPeerConnection>,
    video_sender: Option<Arc<RTCRtpSender>>,
}

#[async_trait]
impl VideoSender for RtcTransport {
    fn peer_label(&self) -> String {
        self.label.clone()
    }

    async fn replace_video_track(&self, track: LocalTrack) -> anyhow::Result<()> {
        let sender = self
            .video_sender
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No outgoing video on {}", self.label))?;
        sender.replace_track(Some(track)).await?;
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> anyhow::Result<String> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(offer.sdp)
    }

    async fn accept_offer(&self, sdp: String) -> anyhow::Result<String> {
        self.peer_connection
            .set_remote_description(RTCSessionDescription::offer(sdp)?)
            .await?;
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(answer.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> anyhow::Result<()> {
        self.peer_connection
            .set_remote_description(RTCSessionDescription::answer(sdp)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: String) -> anyhow::Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_str(&candidate)?;
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.peer_connection.close().await {
            tracing::warn!("Error closing peer connection {}: {}", self.label, e);
        }
    }
}
