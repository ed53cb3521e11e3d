pub mod audio;
pub mod landmarks;
pub mod lip_sync;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod speech_activity;

use std::fmt::Display;

/// Failures while acquiring an input device. These are surfaced to the caller as-is, nothing
/// in the pipeline retries on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverError {
    /// The requested device does not exist.
    DeviceNotFound(String),
    /// The OS or the user refused access.
    PermissionDenied(String),
    /// Device enumeration failed.
    Enumeration(String),
    /// The device exists but a stream could not be created or started.
    Stream(String),
    /// The platform has no implementation for this receiver.
    Unsupported,
    /// Tried to stop something that was never started.
    NotStarted,
}

impl Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotFound(v) => write!(f, "Device not found: {v}"),
            Self::PermissionDenied(v) => write!(f, "Permission denied: {v}"),
            Self::Enumeration(v) => write!(f, "Unable to enumerate devices: {v}"),
            Self::Stream(v) => write!(f, "Unable to open stream: {v}"),
            Self::Unsupported => write!(f, "Receiver is not supported on this platform"),
            Self::NotStarted => write!(f, "Receiver was not started"),
        }
    }
}

impl std::error::Error for ReceiverError {}

/// Lifecycle of an input source that owns live resources.
pub trait Receiver {
    /// Acquire the underlying resource.
    fn start(&mut self) -> Result<(), ReceiverError>;

    /// Release the underlying resource. Must be safe to call before a new `start`.
    fn stop(&mut self) -> Result<(), ReceiverError>;

    fn is_running(&self) -> bool;
}
