//! Error types for the recording engine.

use snaply_capture::CaptureError;
use snaply_encoder::EncoderError;
use snaply_ipc::{ErrorCode, PluginError};
use thiserror::Error;

/// Broad error category, used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Consent refused or withdrawn.
    Permission,

    /// Encoder or container parameters rejected.
    Configuration,

    /// Filesystem or container write failure.
    Io,

    /// Operation not valid in the current session state.
    State,

    /// Native handle or capture source failure.
    Resource,
}

/// Errors surfaced by recording sessions.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// The user declined capture consent.
    #[error("Screen capture permission denied")]
    PermissionDenied,

    /// Consent was revoked while recording.
    #[error("Screen capture permission revoked")]
    PermissionRevoked,

    /// The encoder backend rejected the configuration.
    #[error("Encoder configuration rejected: {0}")]
    Configuration(String),

    /// The host surface is being torn down.
    #[error("Host is finishing, recording not started")]
    AlreadyFinishing,

    /// Stop requested with nothing recording.
    #[error("No active recording to stop")]
    NoActiveSession,

    /// Operation invoked in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Container write or finish failure.
    #[error("Container error: {0}")]
    Container(String),

    /// Native resource failure.
    #[error("Resource error: {0}")]
    Resource(String),

    /// Frame capture failure.
    #[error("Capture error: {0}")]
    Capture(String),

    /// The engine thread is gone.
    #[error("Recorder engine is not running")]
    EngineUnavailable,
}

impl RecordingError {
    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied | Self::PermissionRevoked => ErrorCategory::Permission,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Io(_) | Self::Container(_) => ErrorCategory::Io,
            Self::AlreadyFinishing | Self::NoActiveSession | Self::InvalidState(_) => {
                ErrorCategory::State
            }
            Self::Resource(_) | Self::Capture(_) | Self::EngineUnavailable => {
                ErrorCategory::Resource
            }
        }
    }

    /// Returns the stable wire code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::PermissionRevoked => ErrorCode::PermissionRevoked,
            Self::Configuration(_) => ErrorCode::EncoderConfigError,
            Self::AlreadyFinishing => ErrorCode::AlreadyFinishing,
            Self::NoActiveSession => ErrorCode::NoActiveSession,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Io(_) | Self::Container(_) => ErrorCode::IoError,
            Self::Resource(_) => ErrorCode::ResourceError,
            Self::Capture(_) => ErrorCode::CaptureError,
            Self::EngineUnavailable => ErrorCode::EngineUnavailable,
        }
    }
}

impl From<EncoderError> for RecordingError {
    fn from(err: EncoderError) -> Self {
        match err {
            EncoderError::UnsupportedConfig(msg) | EncoderError::Initialization(msg) => {
                Self::Configuration(msg)
            }
            EncoderError::Io(e) => Self::Io(e),
            EncoderError::Container(msg) | EncoderError::ContainerFailed(msg) => {
                Self::Container(msg)
            }
            e @ EncoderError::InvalidState { .. } => Self::InvalidState(e.to_string()),
            e => Self::Resource(e.to_string()),
        }
    }
}

impl From<CaptureError> for RecordingError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => Self::PermissionDenied,
            CaptureError::PermissionRevoked | CaptureError::ChannelDisconnected => {
                Self::PermissionRevoked
            }
            e @ CaptureError::StaleToken { .. } => Self::InvalidState(e.to_string()),
            e => Self::Capture(e.to_string()),
        }
    }
}

impl From<RecordingError> for PluginError {
    fn from(err: RecordingError) -> Self {
        PluginError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_errors_map_to_codes() {
        let err: RecordingError = EncoderError::UnsupportedConfig("odd".into()).into();
        assert_eq!(err.code(), ErrorCode::EncoderConfigError);
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err: RecordingError = EncoderError::ContainerFailed("full".into()).into();
        assert_eq!(err.code(), ErrorCode::IoError);
    }

    #[test]
    fn test_capture_errors_map_to_codes() {
        let err: RecordingError = CaptureError::PermissionDenied.into();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);

        let err: RecordingError = CaptureError::FrameUnavailable("busy".into()).into();
        assert_eq!(err.code(), ErrorCode::CaptureError);
    }

    #[test]
    fn test_plugin_error_conversion() {
        let err: PluginError = RecordingError::NoActiveSession.into();
        assert_eq!(err.code, ErrorCode::NoActiveSession);
        assert_eq!(err.message, "No active recording to stop");
    }
}
