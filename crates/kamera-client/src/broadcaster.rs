//! Broadcaster lifecycle controller
//!
//! Holds one peer session per viewer. Each `peer-joined` starts a fresh
//! session with an offer carrying the local tracks; a session that fails or
//! whose viewer leaves is torn down without retry. Camera and mode switches,
//! whether asked for locally or by any viewer, go through the shared
//! [`MediaSourceManager`] and affect every session at once.

use kamera_media::{MediaError, MediaSourceManager, SwitchOutcome};
use kamera_protocol::{CaptureMode, ClientMessage, IceTarget, PeerState, ServerMessage};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::ClientError;
use crate::session::PeerSession;
use crate::signaling::SignalingClient;
use crate::transport::{PeerEvent, PeerTransport, TransportEvent, TransportFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcasterCommand {
    Stop,
    SwitchCamera,
    SetMode(CaptureMode),
}

/// Snapshot for a presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcasterStatus {
    /// The relay acknowledged us as the broadcaster
    pub registered: bool,
    pub viewers: BTreeMap<Uuid, PeerState>,
    /// Label of the active capture source
    pub source: Option<String>,
    pub mode: CaptureMode,
}

impl BroadcasterStatus {
    pub fn live_viewers(&self) -> usize {
        self.viewers.values().filter(|s| s.is_live()).count()
    }
}

#[derive(Clone)]
pub struct BroadcasterHandle {
    commands: mpsc::Sender<BroadcasterCommand>,
    status: watch::Receiver<BroadcasterStatus>,
}

impl BroadcasterHandle {
    pub async fn send(&self, command: BroadcasterCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SignalingClosed)
    }

    pub async fn stop(&self) -> Result<(), ClientError> {
        self.send(BroadcasterCommand::Stop).await
    }

    pub fn status(&self) -> watch::Receiver<BroadcasterStatus> {
        self.status.clone()
    }
}

enum Internal {
    OfferReady {
        viewer: Uuid,
        session: Uuid,
        result: anyhow::Result<(Arc<dyn PeerTransport>, String)>,
    },
    AnswerApplied {
        viewer: Uuid,
        session: Uuid,
        result: anyhow::Result<()>,
    },
    SwapFinished {
        /// Sessions the swap replaced tracks on
        included: Vec<Uuid>,
        result: Result<SwitchOutcome, MediaError>,
    },
}

enum Swap {
    NextCamera,
    Mode(CaptureMode),
}

pub struct BroadcasterController {
    signaling: SignalingClient,
    inbound: mpsc::Receiver<ServerMessage>,
    commands: mpsc::Receiver<BroadcasterCommand>,
    factory: Arc<dyn TransportFactory>,
    media: Arc<MediaSourceManager>,
    sessions: HashMap<Uuid, PeerSession>,
    registered: bool,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<BroadcasterStatus>,
}

impl BroadcasterController {
    pub fn new(
        signaling: SignalingClient,
        inbound: mpsc::Receiver<ServerMessage>,
        factory: Arc<dyn TransportFactory>,
        media: Arc<MediaSourceManager>,
    ) -> (Self, BroadcasterHandle) {
        let (commands_tx, commands) = mpsc::channel(16);
        let (status, status_rx) = watch::channel(BroadcasterStatus::default());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let controller = Self {
            signaling,
            inbound,
            commands,
            factory,
            media,
            sessions: HashMap::new(),
            registered: false,
            transport_tx,
            transport_rx,
            internal_tx,
            internal_rx,
            status,
        };
        let handle = BroadcasterHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    /// Acquire the camera, register with the relay and serve viewers until
    /// stopped or the signaling channel goes away
    pub async fn run(mut self) -> Result<(), ClientError> {
        self.media.start().await?;
        let result = self.event_loop().await;

        for session in self.sessions.values_mut() {
            session.close();
        }
        self.sessions.clear();
        self.media.stop().await;
        self.registered = false;
        self.publish().await;
        self.signaling.close();
        result
    }

    async fn event_loop(&mut self) -> Result<(), ClientError> {
        self.signaling.send(ClientMessage::RegisterBroadcaster).await?;
        self.publish().await;

        loop {
            tokio::select! {
                msg = self.inbound.recv() => match msg {
                    Some(msg) => self.on_server_message(msg).await?,
                    None => {
                        tracing::info!("Signaling channel gone, broadcast ending");
                        return Ok(());
                    }
                },
                Some(command) = self.commands.recv() => {
                    if !self.on_command(command) {
                        return Ok(());
                    }
                }
                Some(event) = self.transport_rx.recv() => self.on_transport_event(event).await?,
                Some(event) = self.internal_rx.recv() => self.on_internal(event).await?,
            }
        }
    }

    async fn on_server_message(&mut self, msg: ServerMessage) -> Result<(), ClientError> {
        match msg {
            ServerMessage::Welcome { connection_id } => {
                tracing::debug!("Relay connection id {}", connection_id);
            }
            ServerMessage::BroadcasterRegistered => {
                tracing::info!("Registered as broadcaster");
                self.registered = true;
            }
            ServerMessage::BroadcasterAvailable => {
                // Someone else registered after us
                if self.registered {
                    tracing::warn!("Another broadcaster took over the relay");
                }
                self.registered = false;
            }
            ServerMessage::PeerJoined { viewer_id } => self.on_peer_joined(viewer_id).await,
            ServerMessage::Answer { viewer_id, sdp } => self.on_answer(viewer_id, sdp),
            ServerMessage::IceCandidate { candidate, from } => {
                match self.sessions.get_mut(&from) {
                    Some(session) if !session.is_closed() => session.on_remote_candidate(candidate),
                    _ => tracing::debug!("Dropping candidate from unknown viewer {}", from),
                }
            }
            ServerMessage::PeerLeft { viewer_id } => {
                tracing::info!("Viewer {} left", viewer_id);
                self.teardown(viewer_id);
            }
            ServerMessage::DeviceSwitchRequest => {
                tracing::info!("Viewer requested a camera switch");
                self.start_swap(Swap::NextCamera);
            }
            ServerMessage::ModeSwitchRequest { low_light } => {
                let mode = self.media.mode().await.resolve(low_light);
                tracing::info!("Viewer requested {:?} mode", mode);
                self.start_swap(Swap::Mode(mode));
            }
            ServerMessage::Error { message } => {
                tracing::warn!("Relay reported an error: {}", message);
            }
            other => tracing::debug!("Broadcaster ignoring {:?}", other),
        }
        self.publish().await;
        Ok(())
    }

    async fn on_peer_joined(&mut self, viewer: Uuid) {
        if let Some(mut previous) = self.sessions.remove(&viewer) {
            previous.close();
        }

        let mut session = PeerSession::new(viewer.to_string());
        session.transition(PeerState::Negotiating);
        let session_id = session.id;
        let label = session.label.clone();
        self.sessions.insert(viewer, session);

        let tracks = self.media.tracks().await;
        let factory = self.factory.clone();
        let events = self.transport_tx.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = open_and_offer(factory, session_id, label, tracks, events).await;
            let _ = internal.send(Internal::OfferReady {
                viewer,
                session: session_id,
                result,
            });
        });
    }

    fn on_answer(&mut self, viewer: Uuid, sdp: String) {
        let Some(session) = self.sessions.get(&viewer) else {
            tracing::warn!("Answer from unknown viewer {}", viewer);
            return;
        };
        let Some(transport) = session.transport() else {
            tracing::warn!("Answer from {} before our offer went out", viewer);
            return;
        };
        if session.remote_applied() {
            tracing::debug!("Duplicate answer from {}", viewer);
            return;
        }

        let session_id = session.id;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = transport.apply_answer(sdp).await;
            let _ = internal.send(Internal::AnswerApplied {
                viewer,
                session: session_id,
                result,
            });
        });
    }

    fn on_command(&mut self, command: BroadcasterCommand) -> bool {
        match command {
            BroadcasterCommand::Stop => {
                tracing::info!("Stopping broadcast");
                return false;
            }
            BroadcasterCommand::SwitchCamera => self.start_swap(Swap::NextCamera),
            BroadcasterCommand::SetMode(mode) => self.start_swap(Swap::Mode(mode)),
        }
        true
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<(), ClientError> {
        let Some((viewer, session)) = self
            .sessions
            .iter_mut()
            .find(|(_, s)| s.id == event.session && !s.is_closed())
        else {
            tracing::debug!("Ignoring event from stale session {}", event.session);
            return Ok(());
        };
        let viewer = *viewer;

        match event.event {
            PeerEvent::LocalCandidate(candidate) => {
                self.signaling
                    .send(ClientMessage::IceCandidate {
                        candidate,
                        target: IceTarget::Peer(viewer),
                    })
                    .await?;
            }
            PeerEvent::Connectivity(signal) => {
                let next = session.state.on_connectivity(signal);
                session.transition(next);
                if next.is_closed() {
                    tracing::warn!("Lost viewer {} ({:?})", viewer, signal);
                    self.teardown(viewer);
                }
                self.publish().await;
            }
        }
        Ok(())
    }

    async fn on_internal(&mut self, event: Internal) -> Result<(), ClientError> {
        match event {
            Internal::OfferReady {
                viewer,
                session,
                result,
            } => {
                let current = self
                    .sessions
                    .get_mut(&viewer)
                    .filter(|s| s.id == session && !s.is_closed());
                let Some(current) = current else {
                    if let Ok((transport, _)) = result {
                        transport.close().await;
                    }
                    return Ok(());
                };

                match result {
                    Ok((transport, sdp)) => {
                        current.attach(transport.clone());
                        // Its tracks were read before any swap that is now
                        // running or already done
                        self.sync_video(vec![transport]);
                        self.signaling
                            .send(ClientMessage::Offer {
                                viewer_id: viewer,
                                sdp,
                            })
                            .await?;
                    }
                    Err(e) => {
                        tracing::error!("Failed to build offer for {}: {}", viewer, e);
                        self.teardown(viewer);
                        self.publish().await;
                    }
                }
            }
            Internal::AnswerApplied {
                viewer,
                session,
                result,
            } => {
                let Some(current) = self
                    .sessions
                    .get_mut(&viewer)
                    .filter(|s| s.id == session && !s.is_closed())
                else {
                    return Ok(());
                };
                match result {
                    Ok(()) => current.mark_remote_applied(),
                    Err(e) => {
                        tracing::error!("Failed to apply answer from {}: {}", viewer, e);
                        self.teardown(viewer);
                        self.publish().await;
                    }
                }
            }
            Internal::SwapFinished { included, result } => {
                if matches!(
                    result,
                    Ok(SwitchOutcome::Switched { .. } | SwitchOutcome::ModeChanged { .. })
                ) {
                    let missed = self
                        .sessions
                        .values()
                        .filter(|s| !s.is_closed() && !included.contains(&s.id))
                        .filter_map(|s| s.transport())
                        .collect();
                    self.sync_video(missed);
                }
                match result {
                    Ok(SwitchOutcome::Switched { source, report }) => tracing::info!(
                        "Now streaming {} to {} viewers",
                        source.human_label,
                        report.replaced
                    ),
                    Ok(SwitchOutcome::ModeChanged { mode, report }) => tracing::info!(
                        "Now streaming in {:?} mode to {} viewers",
                        mode,
                        report.replaced
                    ),
                    Ok(SwitchOutcome::Busy) => tracing::info!("Switch skipped, one already running"),
                    Ok(SwitchOutcome::NotEnoughSources { available }) => {
                        tracing::info!("Switch skipped, {} camera(s) available", available)
                    }
                    Ok(SwitchOutcome::Unchanged) => {}
                    Err(e) => tracing::error!("Capture switch failed: {}", e),
                }
                self.publish().await;
            }
        }
        Ok(())
    }

    /// Replace the outgoing video of every open session in the background
    fn start_swap(&self, swap: Swap) {
        let (included, senders): (Vec<Uuid>, Vec<Arc<dyn PeerTransport>>) = self
            .sessions
            .values()
            .filter(|s| !s.is_closed())
            .filter_map(|s| s.transport().map(|t| (s.id, t)))
            .unzip();
        let media = self.media.clone();
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = match swap {
                Swap::NextCamera => media.switch_to_next(&senders).await,
                Swap::Mode(mode) => media.switch_mode(mode, &senders).await,
            };
            let _ = internal.send(Internal::SwapFinished { included, result });
        });
    }

    /// Move `transports` onto the active video track once no swap is running
    fn sync_video(&self, transports: Vec<Arc<dyn PeerTransport>>) {
        if transports.is_empty() {
            return;
        }
        let media = self.media.clone();
        tokio::spawn(async move {
            match media.sync_video(&transports).await {
                Ok(report) => {
                    for peer in report.failed {
                        tracing::warn!("Could not move {} to the active camera", peer);
                    }
                }
                Err(e) => tracing::debug!("No video to sync: {}", e),
            }
        });
    }

    fn teardown(&mut self, viewer: Uuid) {
        if let Some(mut session) = self.sessions.remove(&viewer) {
            session.close();
        }
    }

    async fn publish(&self) {
        let viewers = self
            .sessions
            .iter()
            .map(|(id, session)| (*id, session.state))
            .collect();
        self.status.send_replace(BroadcasterStatus {
            registered: self.registered,
            viewers,
            source: self.media.active_descriptor().await.map(|d| d.human_label),
            mode: self.media.mode().await,
        });
    }
}

async fn open_and_offer(
    factory: Arc<dyn TransportFactory>,
    session: Uuid,
    label: String,
    tracks: Vec<kamera_media::LocalTrack>,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> anyhow::Result<(Arc<dyn PeerTransport>, String)> {
    let transport = factory.create(session, label, tracks, events).await?;
    match transport.create_offer().await {
        Ok(sdp) => Ok((transport, sdp)),
        Err(e) => {
            transport.close().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeFactory;
    use kamera_media::SyntheticBackend;
    use kamera_protocol::Connectivity;
    use std::sync::atomic::Ordering;
    use tokio::task::JoinHandle;
    use webrtc::track::track_local::TrackLocal;

    struct Harness {
        factory: Arc<FakeFactory>,
        media: Arc<MediaSourceManager>,
        outbound: mpsc::Receiver<ClientMessage>,
        inbound: mpsc::Sender<ServerMessage>,
        handle: BroadcasterHandle,
        task: JoinHandle<Result<(), ClientError>>,
    }

    impl Harness {
        async fn start(labels: &[&str]) -> Self {
            let factory = FakeFactory::new();
            let media = Arc::new(MediaSourceManager::new(Arc::new(
                SyntheticBackend::from_labels(labels),
            )));
            let (out_tx, mut outbound) = mpsc::channel(32);
            let (inbound, in_rx) = mpsc::channel(32);
            let (controller, handle) = BroadcasterController::new(
                SignalingClient::from_sender(out_tx),
                in_rx,
                factory.clone(),
                media.clone(),
            );
            let task = tokio::spawn(controller.run());

            assert_eq!(
                outbound.recv().await,
                Some(ClientMessage::RegisterBroadcaster)
            );
            inbound
                .send(ServerMessage::BroadcasterRegistered)
                .await
                .unwrap();

            let h = Self {
                factory,
                media,
                outbound,
                inbound,
                handle,
                task,
            };
            h.wait_for(|s| s.registered).await;
            h
        }

        async fn expect(&mut self) -> ClientMessage {
            self.outbound.recv().await.expect("outbound closed")
        }

        async fn deliver(&self, msg: ServerMessage) {
            self.inbound.send(msg).await.unwrap();
        }

        async fn wait_for(&self, f: impl Fn(&BroadcasterStatus) -> bool) -> BroadcasterStatus {
            self.handle.status().wait_for(f).await.unwrap().clone()
        }

        /// peer-joined, offer, answer, connected
        async fn connect_viewer(&mut self, index: usize) -> Uuid {
            let viewer = Uuid::new_v4();
            self.deliver(ServerMessage::PeerJoined { viewer_id: viewer })
                .await;
            match self.expect().await {
                ClientMessage::Offer { viewer_id, sdp } => {
                    assert_eq!(viewer_id, viewer);
                    assert_eq!(sdp, format!("offer-for:{}", viewer));
                }
                other => panic!("expected an offer, got {:?}", other),
            }
            self.deliver(ServerMessage::Answer {
                viewer_id: viewer,
                sdp: "a".into(),
            })
            .await;
            let transport = self.factory.transport(index).await;
            while transport.answer().is_none() {
                tokio::task::yield_now().await;
            }
            transport.emit(Connectivity::Connected);
            self.wait_for(|s| s.viewers.get(&viewer) == Some(&PeerState::Live))
                .await;
            viewer
        }
    }

    #[tokio::test]
    async fn viewer_reaches_live_with_local_tracks() {
        let mut h = Harness::start(&["Front Camera", "Back Main"]).await;
        let viewer = h.connect_viewer(0).await;

        let transport = h.factory.transport(0).await;
        assert_eq!(transport.video().as_deref(), Some("video-synthetic-1"));
        assert_eq!(transport.answer().as_deref(), Some("a"));

        transport.raise(PeerEvent::LocalCandidate("cand".into()));
        assert_eq!(
            h.expect().await,
            ClientMessage::IceCandidate {
                candidate: "cand".into(),
                target: IceTarget::Peer(viewer)
            }
        );

        let status = h.handle.status().borrow().clone();
        assert_eq!(status.live_viewers(), 1);
        assert_eq!(status.source.as_deref(), Some("Back Main"));
    }

    #[tokio::test]
    async fn viewer_candidates_wait_for_the_answer() {
        let mut h = Harness::start(&["Back Main"]).await;
        let viewer = Uuid::new_v4();

        h.deliver(ServerMessage::PeerJoined { viewer_id: viewer })
            .await;
        assert!(matches!(h.expect().await, ClientMessage::Offer { .. }));
        h.deliver(ServerMessage::IceCandidate {
            candidate: "early".into(),
            from: viewer,
        })
        .await;

        let transport = h.factory.transport(0).await;
        tokio::task::yield_now().await;
        assert!(transport.candidates().is_empty());

        h.deliver(ServerMessage::Answer {
            viewer_id: viewer,
            sdp: "a".into(),
        })
        .await;
        while transport.candidates().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.candidates(), vec!["early"]);
    }

    #[tokio::test]
    async fn remote_switch_request_swaps_every_viewer() {
        let mut h = Harness::start(&["Back Main", "Front Camera"]).await;
        h.connect_viewer(0).await;
        h.connect_viewer(1).await;

        h.deliver(ServerMessage::DeviceSwitchRequest).await;
        let status = h
            .wait_for(|s| s.source.as_deref() == Some("Front Camera"))
            .await;

        assert_eq!(status.live_viewers(), 2);
        for index in 0..2 {
            assert_eq!(
                h.factory.transport(index).await.video().as_deref(),
                Some("video-synthetic-1")
            );
        }
    }

    #[tokio::test]
    async fn failed_replacement_on_one_viewer_still_switches() {
        let mut h = Harness::start(&["Back Main", "Front Camera"]).await;
        h.connect_viewer(0).await;
        h.factory.fail_replace.store(true, Ordering::SeqCst);
        h.connect_viewer(1).await;

        h.handle
            .send(BroadcasterCommand::SwitchCamera)
            .await
            .unwrap();
        h.wait_for(|s| s.source.as_deref() == Some("Front Camera"))
            .await;

        assert_eq!(
            h.factory.transport(0).await.video().as_deref(),
            Some("video-synthetic-1")
        );
        assert_eq!(
            h.factory.transport(1).await.video().as_deref(),
            Some("video-synthetic-0")
        );
    }

    #[tokio::test]
    async fn viewer_joining_during_a_switch_ends_on_the_new_camera() {
        let h = Harness::start(&["Back Main", "Front Camera"]).await;
        let viewer = Uuid::new_v4();

        h.deliver(ServerMessage::PeerJoined { viewer_id: viewer })
            .await;
        h.deliver(ServerMessage::DeviceSwitchRequest).await;
        h.wait_for(|s| s.source.as_deref() == Some("Front Camera"))
            .await;

        let transport = h.factory.transport(0).await;
        let active = h.media.active().await.unwrap().video_track();
        for _ in 0..100 {
            if transport.video().as_deref() == Some(active.id()) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.video().as_deref(), Some("video-synthetic-1"));
        assert_eq!(active.id(), "video-synthetic-1");
    }

    #[tokio::test]
    async fn mode_request_toggles_capture_mode() {
        let h = Harness::start(&["Back Main"]).await;

        h.deliver(ServerMessage::ModeSwitchRequest { low_light: None })
            .await;
        h.wait_for(|s| s.mode == CaptureMode::LowLight).await;

        h.deliver(ServerMessage::ModeSwitchRequest {
            low_light: Some(false),
        })
        .await;
        let status = h.wait_for(|s| s.mode == CaptureMode::Standard).await;
        assert_eq!(status.source.as_deref(), Some("Back Main"));
    }

    #[tokio::test]
    async fn lost_or_departed_viewers_are_dropped_without_retry() {
        let mut h = Harness::start(&["Back Main"]).await;
        let first = h.connect_viewer(0).await;
        let second = h.connect_viewer(1).await;

        h.factory.transport(0).await.emit(Connectivity::Failed);
        h.wait_for(|s| !s.viewers.contains_key(&first)).await;

        h.deliver(ServerMessage::PeerLeft { viewer_id: second })
            .await;
        let status = h.wait_for(|s| s.viewers.is_empty()).await;

        assert!(h.factory.transport(0).await.closed().await);
        assert!(h.factory.transport(1).await.closed().await);
        assert_eq!(h.factory.created(), 2);
        assert!(status.registered);
    }

    #[tokio::test]
    async fn rejoining_viewer_replaces_its_session() {
        let mut h = Harness::start(&["Back Main"]).await;
        let viewer = Uuid::new_v4();

        h.deliver(ServerMessage::PeerJoined { viewer_id: viewer })
            .await;
        assert!(matches!(h.expect().await, ClientMessage::Offer { .. }));
        h.deliver(ServerMessage::PeerJoined { viewer_id: viewer })
            .await;
        assert!(matches!(h.expect().await, ClientMessage::Offer { .. }));

        assert!(h.factory.transport(0).await.closed().await);
        assert!(!h.factory.transport(1).await.is_closed());
        let status = h.handle.status().borrow().clone();
        assert_eq!(status.viewers.len(), 1);
    }

    #[tokio::test]
    async fn stop_closes_everything() {
        let mut h = Harness::start(&["Back Main"]).await;
        h.connect_viewer(0).await;

        h.handle.stop().await.unwrap();
        h.task.await.unwrap().unwrap();

        assert!(h.factory.transport(0).await.closed().await);
        assert!(h.media.active().await.is_none());
        let status = h.handle.status().borrow().clone();
        assert!(status.viewers.is_empty());
        assert!(!status.registered);
    }
}
