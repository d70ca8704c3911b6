//! In-memory transports for controller tests

use async_trait::async_trait;
use kamera_media::{LocalTrack, VideoSender};
use kamera_protocol::Connectivity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use webrtc::track::track_local::TrackLocal;

use super::{PeerEvent, PeerTransport, TransportEvent, TransportEventSender, TransportFactory};

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    pub fail_accept: AtomicBool,
    pub fail_replace: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// Wait until the `index`-th transport exists
    pub async fn transport(&self, index: usize) -> Arc<FakeTransport> {
        loop {
            if let Some(t) = self.created.lock().unwrap().get(index).cloned() {
                return t;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        session: Uuid,
        label: String,
        tracks: Vec<LocalTrack>,
        events: TransportEventSender,
    ) -> anyhow::Result<Arc<dyn PeerTransport>> {
        let video = tracks
            .iter()
            .find(|t| t.id().starts_with("video"))
            .map(|t| t.id().to_string());
        let transport = Arc::new(FakeTransport {
            session,
            label,
            events,
            fail_accept: self.fail_accept.load(Ordering::SeqCst),
            fail_replace: self.fail_replace.load(Ordering::SeqCst),
            video: Mutex::new(video),
            answer: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

pub struct FakeTransport {
    pub session: Uuid,
    pub label: String,
    events: TransportEventSender,
    fail_accept: bool,
    fail_replace: bool,
    video: Mutex<Option<String>>,
    answer: Mutex<Option<String>>,
    candidates: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn emit(&self, signal: Connectivity) {
        self.raise(PeerEvent::Connectivity(signal));
    }

    pub fn raise(&self, event: PeerEvent) {
        let _ = self.events.send(TransportEvent {
            session: self.session,
            event,
        });
    }

    pub fn video(&self) -> Option<String> {
        self.video.lock().unwrap().clone()
    }

    pub fn answer(&self) -> Option<String> {
        self.answer.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closing happens on a spawned task; give it a few turns
    pub async fn closed(&self) -> bool {
        for _ in 0..100 {
            if self.is_closed() {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }
}

#[async_trait]
impl VideoSender for FakeTransport {
    fn peer_label(&self) -> String {
        self.label.clone()
    }

    async fn replace_video_track(&self, track: LocalTrack) -> anyhow::Result<()> {
        if self.fail_replace {
            anyhow::bail!("sender gone");
        }
        *self.video.lock().unwrap() = Some(track.id().to_string());
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> anyhow::Result<String> {
        Ok(format!("offer-for:{}", self.label))
    }

    async fn accept_offer(&self, sdp: String) -> anyhow::Result<String> {
        if self.fail_accept {
            anyhow::bail!("malformed offer");
        }
        Ok(format!("answer:{}", sdp))
    }

    async fn apply_answer(&self, sdp: String) -> anyhow::Result<()> {
        *self.answer.lock().unwrap() = Some(sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: String) -> anyhow::Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
