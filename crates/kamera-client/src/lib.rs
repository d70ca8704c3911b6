//! Kamera client library
//!
//! Signaling, peer transports and the broadcaster and viewer lifecycle
//! controllers.

pub mod broadcaster;
pub mod config;
pub mod error;
mod session;
pub mod signaling;
pub mod transport;
pub mod viewer;

pub use broadcaster::{BroadcasterCommand, BroadcasterController, BroadcasterHandle, BroadcasterStatus};
pub use error::ClientError;
pub use signaling::SignalingClient;
pub use viewer::{ViewerCommand, ViewerController, ViewerHandle, ViewerStatus};
