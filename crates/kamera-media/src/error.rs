use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("No capture source is active")]
    NoActiveSource,

    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to acquire capture source {}: {reason}", .device.as_deref().unwrap_or("(default)"))]
    Acquire {
        device: Option<String>,
        reason: String,
    },

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),
}
