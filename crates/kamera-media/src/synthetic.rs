//! Headless capture backend
//!
//! Serves a fixed device list and hands out real webrtc local tracks that
//! carry no samples. Lets the signaling and negotiation stack run on
//! machines without cameras.

use async_trait::async_trait;
use kamera_protocol::{FacingClass, MediaSourceDescriptor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::backend::{CaptureBackend, CaptureConstraints, CaptureSource, LocalTrack};
use crate::error::MediaError;

const STREAM_ID: &str = "kamera-local";

pub struct SyntheticBackend {
    devices: Vec<MediaSourceDescriptor>,
}

impl SyntheticBackend {
    pub fn new(devices: Vec<MediaSourceDescriptor>) -> Self {
        Self { devices }
    }

    /// Build a device list from human labels; ids are `synthetic-<n>`
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        Self::new(
            labels
                .iter()
                .enumerate()
                .map(|(i, label)| MediaSourceDescriptor::new(format!("synthetic-{}", i), label.as_ref()))
                .collect(),
        )
    }

    fn resolve(&self, device_id: Option<&str>) -> Result<&MediaSourceDescriptor, MediaError> {
        match device_id {
            Some(id) => self
                .devices
                .iter()
                .find(|d| d.id == id)
                .ok_or_else(|| MediaError::DeviceNotFound(id.to_string())),
            // Like a facing-mode request for the environment camera
            None => self
                .devices
                .iter()
                .find(|d| d.facing_class != FacingClass::Front)
                .or_else(|| self.devices.first())
                .ok_or_else(|| MediaError::Acquire {
                    device: None,
                    reason: "no capture devices".to_string(),
                }),
        }
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    async fn enumerate(&self) -> Result<Vec<MediaSourceDescriptor>, MediaError> {
        Ok(self.devices.clone())
    }

    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn CaptureSource>, MediaError> {
        let device = self.resolve(constraints.device_id.as_deref())?;
        tracing::info!(
            "Opening synthetic capture {} ({}x{}@{})",
            device.human_label,
            constraints.width,
            constraints.height,
            constraints.frame_rate
        );
        Ok(Arc::new(SyntheticSource::new(&device.id, constraints.audio)))
    }
}

pub struct SyntheticSource {
    device_id: String,
    video: Arc<TrackLocalStaticSample>,
    audio: Option<Arc<TrackLocalStaticSample>>,
    stopped: AtomicBool,
}

impl SyntheticSource {
    fn new(device_id: &str, audio: bool) -> Self {
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            format!("video-{}", device_id),
            STREAM_ID.to_string(),
        ));
        let audio = audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                format!("audio-{}", device_id),
                STREAM_ID.to_string(),
            ))
        });

        Self {
            device_id: device_id.to_string(),
            video,
            audio,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CaptureSource for SyntheticSource {
    fn device_id(&self) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn video_track(&self) -> LocalTrack {
        self.video.clone()
    }

    fn audio_track(&self) -> Option<LocalTrack> {
        self.audio.clone().map(|track| track as LocalTrack)
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Stopped synthetic capture {}", self.device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::track::track_local::TrackLocal;

    #[tokio::test]
    async fn default_acquire_prefers_a_back_camera() {
        let backend = SyntheticBackend::from_labels(&["Front Camera", "Back Camera"]);
        let source = backend
            .acquire(&CaptureConstraints::for_mode(Default::default()))
            .await
            .unwrap();

        assert_eq!(source.device_id().as_deref(), Some("synthetic-1"));
        assert_eq!(source.video_track().id(), "video-synthetic-1");
        assert_eq!(source.tracks().len(), 2);
    }

    #[tokio::test]
    async fn unknown_device_is_an_error() {
        let backend = SyntheticBackend::from_labels(&["Back Camera"]);
        let constraints = CaptureConstraints::for_mode(Default::default())
            .with_device(Some("missing".to_string()));

        let result = backend.acquire(&constraints).await;

        assert!(matches!(result, Err(MediaError::DeviceNotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn no_devices_cannot_acquire() {
        let backend = SyntheticBackend::new(vec![]);
        let result = backend
            .acquire(&CaptureConstraints::for_mode(Default::default()))
            .await;
        assert!(matches!(result, Err(MediaError::Acquire { .. })));
    }

    #[test]
    fn stop_is_idempotent() {
        let source = SyntheticSource::new("cam", false);
        assert!(source.audio_track().is_none());
        source.stop();
        source.stop();
        assert!(source.is_stopped());
    }
}
