//! Media source management for Kamera
//!
//! This crate owns the broadcaster's capture side:
//! - Device ordering (main back lens, auxiliary lenses, front)
//! - Hot-swap of the outgoing video track across live peer sessions
//! - Capture mode switching (standard / low light)
//!
//! Device access itself sits behind [`CaptureBackend`].

pub mod backend;
pub mod error;
pub mod manager;
pub mod ordering;
pub mod synthetic;

pub use backend::{CaptureBackend, CaptureConstraints, CaptureSource, LocalTrack, VideoSender};
pub use error::MediaError;
pub use manager::{MediaSourceManager, SwapReport, SwitchOutcome};
pub use ordering::order_sources;
pub use synthetic::SyntheticBackend;
