//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Display metrics could not be read.
    #[error("Display metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// The frame source could not produce a frame.
    #[error("Frame unavailable: {0}")]
    FrameUnavailable(String),

    /// A frame did not match its declared dimensions.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Capture source could not be created from a consent token.
    #[error("Capture source unavailable: {0}")]
    SourceUnavailable(String),

    /// The consent token belongs to another session.
    #[error("Consent token is stale (token generation {token}, session generation {session})")]
    StaleToken { token: u64, session: u64 },

    /// Permission denied for capture.
    #[error("Permission denied for capture")]
    PermissionDenied,

    /// Permission was revoked while capturing.
    #[error("Capture permission revoked")]
    PermissionRevoked,

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Frame channel disconnected.
    #[error("Failed to send frame: channel disconnected")]
    ChannelDisconnected,

    /// Still image compression failed.
    #[error("Image compression failed: {0}")]
    Compression(String),
}
