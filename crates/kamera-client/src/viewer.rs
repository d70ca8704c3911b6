//! Viewer lifecycle controller
//!
//! Drives a single peer session towards the current broadcaster. Signaling
//! messages, transport events, finished negotiation steps and the reconnect
//! timer all arrive as events on one loop, so session state has a single
//! owner. A failed session is closed and, after a fixed delay, a fresh offer
//! is requested.

use kamera_protocol::{ClientMessage, IceTarget, PeerState, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ClientError;
use crate::session::PeerSession;
use crate::signaling::SignalingClient;
use crate::transport::{PeerEvent, PeerTransport, TransportEvent, TransportFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    Leave,
    /// Ask the broadcaster to cycle to its next camera
    RequestCameraSwitch,
    /// Ask the broadcaster for low-light (`Some(true)`), standard, or a toggle
    RequestModeSwitch { low_light: Option<bool> },
}

/// Snapshot for a presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerStatus {
    pub state: PeerState,
    /// The relay reported no broadcaster
    pub waiting: bool,
    pub reconnect_pending: bool,
}

#[derive(Clone)]
pub struct ViewerHandle {
    commands: mpsc::Sender<ViewerCommand>,
    status: watch::Receiver<ViewerStatus>,
}

impl ViewerHandle {
    pub async fn send(&self, command: ViewerCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SignalingClosed)
    }

    pub async fn leave(&self) -> Result<(), ClientError> {
        self.send(ViewerCommand::Leave).await
    }

    pub fn status(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }
}

enum Internal {
    Answered {
        session: Uuid,
        result: anyhow::Result<(Arc<dyn PeerTransport>, String)>,
    },
    ReconnectDue {
        token: u64,
    },
}

pub struct ViewerController {
    signaling: SignalingClient,
    inbound: mpsc::Receiver<ServerMessage>,
    commands: mpsc::Receiver<ViewerCommand>,
    factory: Arc<dyn TransportFactory>,
    reconnect_delay: Duration,
    session: Option<PeerSession>,
    waiting: bool,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    reconnect: Option<JoinHandle<()>>,
    reconnect_token: u64,
    status: watch::Sender<ViewerStatus>,
}

impl ViewerController {
    pub fn new(
        signaling: SignalingClient,
        inbound: mpsc::Receiver<ServerMessage>,
        factory: Arc<dyn TransportFactory>,
        reconnect_delay: Duration,
    ) -> (Self, ViewerHandle) {
        let (commands_tx, commands) = mpsc::channel(16);
        let (status, status_rx) = watch::channel(ViewerStatus::default());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let controller = Self {
            signaling,
            inbound,
            commands,
            factory,
            reconnect_delay,
            session: None,
            waiting: false,
            transport_tx,
            transport_rx,
            internal_tx,
            internal_rx,
            reconnect: None,
            reconnect_token: 0,
            status,
        };
        let handle = ViewerHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    /// Run until the viewer leaves or the signaling channel goes away
    pub async fn run(mut self) -> Result<(), ClientError> {
        let result = self.event_loop().await;
        self.close_session();
        self.cancel_reconnect();
        self.publish();
        self.signaling.close();
        result
    }

    async fn event_loop(&mut self) -> Result<(), ClientError> {
        self.request_offer().await?;

        loop {
            tokio::select! {
                msg = self.inbound.recv() => match msg {
                    Some(msg) => self.on_server_message(msg).await?,
                    None => {
                        tracing::info!("Signaling channel gone, viewer stopping");
                        return Ok(());
                    }
                },
                Some(command) = self.commands.recv() => {
                    if !self.on_command(command).await? {
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
            ServerMessage::Offer { sdp } => self.on_offer(sdp),
            ServerMessage::IceCandidate { candidate, from } => match self.session.as_mut() {
                Some(session) if !session.is_closed() => session.on_remote_candidate(candidate),
                _ => tracing::debug!("Dropping candidate from {} with no open session", from),
            },
            ServerMessage::NoBroadcaster => {
                tracing::info!("No broadcaster yet, waiting");
                self.session = None;
                self.waiting = true;
            }
            ServerMessage::BroadcasterAvailable => {
                tracing::info!("Broadcaster available");
                self.waiting = false;
                self.cancel_reconnect();
                self.request_offer().await?;
            }
            ServerMessage::BroadcasterLeft => {
                tracing::info!("Broadcaster left");
                self.cancel_reconnect();
                self.close_session();
                self.waiting = true;
            }
            ServerMessage::Error { message } => {
                tracing::warn!("Relay reported an error: {}", message);
            }
            other => tracing::debug!("Viewer ignoring {:?}", other),
        }
        self.publish();
        Ok(())
    }

    fn on_offer(&mut self, sdp: String) {
        self.cancel_reconnect();
        self.waiting = false;

        // Reuse the session opened by request-offer; anything else is replaced
        let mut session = match self.session.take() {
            Some(session) if session.state == PeerState::AwaitingRemote => session,
            Some(mut stale) => {
                stale.close();
                PeerSession::new("broadcaster")
            }
            None => PeerSession::new("broadcaster"),
        };
        session.transition(PeerState::Negotiating);

        let session_id = session.id;
        let label = session.label.clone();
        self.session = Some(session);

        let factory = self.factory.clone();
        let events = self.transport_tx.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = answer_offer(factory, session_id, label, events, sdp).await;
            let _ = internal.send(Internal::Answered {
                session: session_id,
                result,
            });
        });
    }

    async fn on_command(&mut self, command: ViewerCommand) -> Result<bool, ClientError> {
        match command {
            ViewerCommand::Leave => {
                tracing::info!("Leaving stream");
                return Ok(false);
            }
            ViewerCommand::RequestCameraSwitch => {
                self.signaling.send(ClientMessage::DeviceSwitchRequest).await?;
            }
            ViewerCommand::RequestModeSwitch { low_light } => {
                self.signaling
                    .send(ClientMessage::ModeSwitchRequest { low_light })
                    .await?;
            }
        }
        Ok(true)
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<(), ClientError> {
        let Some(session) = self.current_session(event.session) else {
            tracing::debug!("Ignoring event from stale session {}", event.session);
            return Ok(());
        };

        match event.event {
            PeerEvent::LocalCandidate(candidate) => {
                self.signaling
                    .send(ClientMessage::IceCandidate {
                        candidate,
                        target: IceTarget::Broadcaster,
                    })
                    .await?;
            }
            PeerEvent::Connectivity(signal) => {
                let next = session.state.on_connectivity(signal);
                session.transition(next);
                if next.is_closed() {
                    tracing::warn!("Connection to broadcaster lost ({:?})", signal);
                    self.fail_session();
                }
                self.publish();
            }
        }
        Ok(())
    }

    async fn on_internal(&mut self, event: Internal) -> Result<(), ClientError> {
        match event {
            Internal::Answered { session, result } => {
                let Some(current) = self.current_session(session) else {
                    if let Ok((transport, _)) = result {
                        transport.close().await;
                    }
                    return Ok(());
                };

                match result {
                    Ok((transport, answer)) => {
                        current.attach(transport);
                        current.mark_remote_applied();
                        self.signaling
                            .send(ClientMessage::Answer { sdp: answer })
                            .await?;
                    }
                    Err(e) => {
                        tracing::error!("Failed to apply offer: {}", e);
                        self.fail_session();
                        self.publish();
                    }
                }
            }
            Internal::ReconnectDue { token } => {
                if token != self.reconnect_token {
                    return Ok(());
                }
                self.reconnect = None;
                tracing::info!("Retrying stream");
                self.request_offer().await?;
                self.publish();
            }
        }
        Ok(())
    }

    fn current_session(&mut self, id: Uuid) -> Option<&mut PeerSession> {
        self.session
            .as_mut()
            .filter(|session| session.id == id && !session.is_closed())
    }

    async fn request_offer(&mut self) -> Result<(), ClientError> {
        self.close_session();
        self.session = Some(PeerSession::new("broadcaster"));
        self.signaling.send(ClientMessage::RequestOffer).await?;
        self.publish();
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if !session.is_closed() {
                session.close();
            }
        }
    }

    /// Tear down the current session and retry later
    fn fail_session(&mut self) {
        self.close_session();
        self.schedule_reconnect();
    }

    /// Single-flight: a new timer replaces any pending one
    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        self.reconnect_token += 1;
        let token = self.reconnect_token;
        let delay = self.reconnect_delay;
        let internal = self.internal_tx.clone();

        tracing::info!("Reconnecting in {:?}", delay);
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ReconnectDue { token });
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
            // A timer that already fired is ignored by token
            self.reconnect_token += 1;
        }
    }

    fn publish(&self) {
        self.status.send_replace(ViewerStatus {
            state: self.session.as_ref().map(|s| s.state).unwrap_or_default(),
            waiting: self.waiting,
            reconnect_pending: self.reconnect.is_some(),
        });
    }
}

async fn answer_offer(
    factory: Arc<dyn TransportFactory>,
    session: Uuid,
    label: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    sdp: String,
) -> anyhow::Result<(Arc<dyn PeerTransport>, String)> {
    let transport = factory.create(session, label, Vec::new(), events).await?;
    match transport.accept_offer(sdp).await {
        Ok(answer) => Ok((transport, answer)),
        Err(e) => {
            transport.close().await;
            Err(e)
        }
    }
}
