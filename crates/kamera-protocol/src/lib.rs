//! Shared protocol definitions for Kamera
//!
//! Wire messages exchanged between clients and the relay, plus the state
//! and media descriptor types both client roles agree on.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::{
    CaptureMode, Connectivity, FacingClass, IceTarget, MediaSourceDescriptor, PeerState,
    ProtocolError,
};
