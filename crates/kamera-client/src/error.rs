use kamera_media::MediaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Signaling channel closed")]
    SignalingClosed,

    #[error("Signaling connection failed: {0}")]
    Signaling(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Media(#[from] MediaError),
}
