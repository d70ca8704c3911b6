//! Media Source Manager
//!
//! Owns the active capture source and performs hot-swaps of the outgoing
//! video track across every live peer session. Only one swap runs at a
//! time; a request arriving while one is in flight is reported as
//! [`SwitchOutcome::Busy`].

use futures::future::join_all;
use kamera_protocol::{CaptureMode, MediaSourceDescriptor};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::backend::{CaptureBackend, CaptureConstraints, CaptureSource, LocalTrack, VideoSender};
use crate::error::MediaError;
use crate::ordering::order_sources;

/// Per-peer results of one track replacement round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    pub replaced: usize,
    /// Labels of peers whose replacement failed
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Now streaming from `source`
    Switched {
        source: MediaSourceDescriptor,
        report: SwapReport,
    },
    /// Same device, new capture constraints
    ModeChanged { mode: CaptureMode, report: SwapReport },
    /// Requested mode is already active
    Unchanged,
    /// Cycling needs at least two devices
    NotEnoughSources { available: usize },
    /// Another swap is in flight
    Busy,
}

#[derive(Default)]
struct ManagerState {
    sources: Vec<MediaSourceDescriptor>,
    active: Option<Arc<dyn CaptureSource>>,
    mode: CaptureMode,
}

pub struct MediaSourceManager {
    backend: Arc<dyn CaptureBackend>,
    state: RwLock<ManagerState>,
    /// Held for the duration of a swap
    swap_lock: Mutex<()>,
}

impl MediaSourceManager {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(ManagerState::default()),
            swap_lock: Mutex::new(()),
        }
    }

    /// Ordered device list as of the last enumeration
    pub async fn sources(&self) -> Vec<MediaSourceDescriptor> {
        self.state.read().await.sources.clone()
    }

    pub async fn active(&self) -> Option<Arc<dyn CaptureSource>> {
        self.state.read().await.active.clone()
    }

    pub async fn mode(&self) -> CaptureMode {
        self.state.read().await.mode
    }

    /// Tracks a new peer session should send
    pub async fn tracks(&self) -> Vec<LocalTrack> {
        self.state
            .read()
            .await
            .active
            .as_ref()
            .map(|source| source.tracks())
            .unwrap_or_default()
    }

    /// Descriptor of the active source, resolved from its live device id
    pub async fn active_descriptor(&self) -> Option<MediaSourceDescriptor> {
        let state = self.state.read().await;
        let device_id = state.active.as_ref()?.device_id()?;
        state.sources.iter().find(|s| s.id == device_id).cloned()
    }

    /// Re-enumerate and re-order capture devices
    pub async fn refresh_sources(&self) -> Result<Vec<MediaSourceDescriptor>, MediaError> {
        let sources = order_sources(&self.backend.enumerate().await?);
        tracing::debug!("Enumerated {} capture sources", sources.len());
        self.state.write().await.sources = sources.clone();
        Ok(sources)
    }

    /// Enumerate devices and open the first one in cycle order.
    /// Returns the already active source if there is one.
    pub async fn start(&self) -> Result<Arc<dyn CaptureSource>, MediaError> {
        let _swap = self.swap_lock.lock().await;

        if let Some(active) = self.active().await {
            return Ok(active);
        }

        let sources = self.refresh_sources().await?;
        let mode = self.mode().await;
        let constraints =
            CaptureConstraints::for_mode(mode).with_device(sources.first().map(|s| s.id.clone()));
        let source = self.backend.acquire(&constraints).await?;

        tracing::info!(
            "Capture started on {}",
            source.device_id().as_deref().unwrap_or("(default)")
        );
        self.state.write().await.active = Some(source.clone());
        Ok(source)
    }

    /// Release the active source
    pub async fn stop(&self) {
        let _swap = self.swap_lock.lock().await;
        if let Some(source) = self.state.write().await.active.take() {
            source.stop();
            tracing::info!("Capture stopped");
        }
    }

    /// Cycle to the next device and swap it into every peer session.
    ///
    /// Only video is replaced on the senders. The previous source is stopped
    /// as a whole, so its audio track ends too and existing peers carry no
    /// audio until they renegotiate. Sessions opened afterwards get the new
    /// source's audio from [`tracks`](Self::tracks).
    pub async fn switch_to_next<S>(&self, senders: &[Arc<S>]) -> Result<SwitchOutcome, MediaError>
    where
        S: VideoSender + ?Sized,
    {
        let Ok(_swap) = self.swap_lock.try_lock() else {
            tracing::warn!("Camera switch already in progress, ignoring request");
            return Ok(SwitchOutcome::Busy);
        };

        let (sources, previous, mode) = {
            let state = self.state.read().await;
            (state.sources.clone(), state.active.clone(), state.mode)
        };
        let previous = previous.ok_or(MediaError::NoActiveSource)?;

        if sources.len() < 2 {
            tracing::info!("Only {} capture source(s), nothing to switch to", sources.len());
            return Ok(SwitchOutcome::NotEnoughSources {
                available: sources.len(),
            });
        }

        // The live track may have been opened by facing mode rather than by
        // id, so resolve where we are every time.
        let current = previous
            .device_id()
            .and_then(|id| sources.iter().position(|s| s.id == id))
            .unwrap_or(0);
        let target = sources[(current + 1) % sources.len()].clone();

        let constraints = CaptureConstraints::for_mode(mode).with_device(Some(target.id.clone()));
        let next = self.acquire_or_refresh(&constraints).await?;

        let report = replace_on_all(senders, next.video_track()).await;
        self.adopt(previous, next).await;

        tracing::info!(
            "Switched camera to {} ({} peers updated, {} failed)",
            target.human_label,
            report.replaced,
            report.failed.len()
        );
        Ok(SwitchOutcome::Switched {
            source: target,
            report,
        })
    }

    /// Re-open the current device with the constraints of `mode`. Audio
    /// behaves as in [`switch_to_next`](Self::switch_to_next).
    pub async fn switch_mode<S>(
        &self,
        mode: CaptureMode,
        senders: &[Arc<S>],
    ) -> Result<SwitchOutcome, MediaError>
    where
        S: VideoSender + ?Sized,
    {
        let Ok(_swap) = self.swap_lock.try_lock() else {
            tracing::warn!("Capture switch already in progress, ignoring mode request");
            return Ok(SwitchOutcome::Busy);
        };

        let (previous, current_mode) = {
            let state = self.state.read().await;
            (state.active.clone(), state.mode)
        };
        let previous = previous.ok_or(MediaError::NoActiveSource)?;

        if mode == current_mode {
            return Ok(SwitchOutcome::Unchanged);
        }

        let constraints = CaptureConstraints::for_mode(mode).with_device(previous.device_id());
        let next = self.acquire_or_refresh(&constraints).await?;

        let report = replace_on_all(senders, next.video_track()).await;
        self.adopt(previous, next).await;
        self.state.write().await.mode = mode;

        tracing::info!(
            "Capture mode now {:?} ({} peers updated, {} failed)",
            mode,
            report.replaced,
            report.failed.len()
        );
        Ok(SwitchOutcome::ModeChanged { mode, report })
    }

    /// Point `senders` at the active video track, waiting out any swap in
    /// flight. For sessions built from tracks read before a swap finished.
    pub async fn sync_video<S>(&self, senders: &[Arc<S>]) -> Result<SwapReport, MediaError>
    where
        S: VideoSender + ?Sized,
    {
        let _swap = self.swap_lock.lock().await;
        let track = self
            .state
            .read()
            .await
            .active
            .as_ref()
            .map(|source| source.video_track())
            .ok_or(MediaError::NoActiveSource)?;
        Ok(replace_on_all(senders, track).await)
    }

    /// Acquire, or re-enumerate and report the failure. The previous
    /// source is untouched either way.
    async fn acquire_or_refresh(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn CaptureSource>, MediaError> {
        match self.backend.acquire(constraints).await {
            Ok(source) => Ok(source),
            Err(e) => {
                tracing::error!("Failed to switch capture source: {}", e);
                if let Err(refresh) = self.refresh_sources().await {
                    tracing::warn!("Re-enumeration after failed switch also failed: {}", refresh);
                }
                Err(e)
            }
        }
    }

    /// Stops every track of `previous`, audio included
    async fn adopt(&self, previous: Arc<dyn CaptureSource>, next: Arc<dyn CaptureSource>) {
        previous.stop();
        self.state.write().await.active = Some(next);
    }
}

/// Replace the video track on every sender; one failure never stops the rest
async fn replace_on_all<S>(senders: &[Arc<S>], track: LocalTrack) -> SwapReport
where
    S: VideoSender + ?Sized,
{
    let results = join_all(senders.iter().map(|sender| {
        let track = track.clone();
        async move { (sender.peer_label(), sender.replace_video_track(track).await) }
    }))
    .await;

    let mut report = SwapReport::default();
    for (peer, result) in results {
        match result {
            Ok(()) => report.replaced += 1,
            Err(e) => {
                tracing::warn!("Track replacement failed for {}: {}", peer, e);
                report.failed.push(peer);
            }
        }
    }
    report
}
