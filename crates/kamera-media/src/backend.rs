//! Seams to the device capture capability and to the peer sessions that
//! consume its video.

use async_trait::async_trait;
use kamera_protocol::{CaptureMode, MediaSourceDescriptor};
use std::sync::Arc;
use webrtc::track::track_local::TrackLocal;

use crate::error::MediaError;

/// Outgoing media track as handed to the transport
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// What to ask the capture capability for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Exact device; `None` lets the backend pick (back camera preferred)
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub audio: bool,
}

impl CaptureConstraints {
    pub fn for_mode(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Standard => Self {
                device_id: None,
                width: 1280,
                height: 720,
                frame_rate: 30,
                audio: true,
            },
            // Fewer pixels and frames buy exposure time per frame
            CaptureMode::LowLight => Self {
                device_id: None,
                width: 640,
                height: 480,
                frame_rate: 15,
                audio: true,
            },
        }
    }

    pub fn with_device(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }
}

/// A live capture: one video track, optionally one audio track
pub trait CaptureSource: Send + Sync {
    /// Device identity reported by the live video track.
    ///
    /// May differ from what enumeration returned when the source was
    /// opened through a facing-mode request.
    fn device_id(&self) -> Option<String>;

    fn video_track(&self) -> LocalTrack;

    fn audio_track(&self) -> Option<LocalTrack>;

    fn tracks(&self) -> Vec<LocalTrack> {
        let mut tracks = vec![self.video_track()];
        tracks.extend(self.audio_track());
        tracks
    }

    /// Release the device. Idempotent.
    fn stop(&self);
}

/// Device enumeration and capture
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<MediaSourceDescriptor>, MediaError>;

    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn CaptureSource>, MediaError>;
}

/// A peer session whose outgoing video can be swapped in place
#[async_trait]
pub trait VideoSender: Send + Sync {
    /// Human-readable peer name for logs
    fn peer_label(&self) -> String;

    /// Replace the outgoing video track without renegotiation
    async fn replace_video_track(&self, track: LocalTrack) -> anyhow::Result<()>;
}
