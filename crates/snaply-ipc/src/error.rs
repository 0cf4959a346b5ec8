//! Structured errors surfaced to the host.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes reported across the host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// User declined capture consent.
    PermissionDenied,

    /// Consent was revoked while recording.
    PermissionRevoked,

    /// Encoder or container rejected the requested parameters.
    EncoderConfigError,

    /// Host surface is being torn down.
    AlreadyFinishing,

    /// Stop requested with nothing recording.
    NoActiveSession,

    /// Operation invoked in the wrong session state.
    InvalidState,

    /// Filesystem or container write failure.
    IoError,

    /// Native handle acquisition or release failure.
    ResourceError,

    /// Frame capture failed.
    CaptureError,

    /// Image compression failed.
    CompressionError,

    /// One or more shared files do not exist.
    MissingFiles,

    /// Share UI could not be shown.
    UiUnavailable,

    /// Output directory could not be resolved.
    DirectoryUnavailable,

    /// Recorder engine is not running.
    EngineUnavailable,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::PermissionRevoked => "PERMISSION_REVOKED",
            Self::EncoderConfigError => "ENCODER_CONFIG_ERROR",
            Self::AlreadyFinishing => "ALREADY_FINISHING",
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::InvalidState => "INVALID_STATE",
            Self::IoError => "IO_ERROR",
            Self::ResourceError => "RESOURCE_ERROR",
            Self::CaptureError => "CAPTURE_ERROR",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::MissingFiles => "MISSING_FILES",
            Self::UiUnavailable => "UI_UNAVAILABLE",
            Self::DirectoryUnavailable => "DIRECTORY_UNAVAILABLE",
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned to the host for a failed method call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PluginError {
    /// Stable error code.
    pub code: ErrorCode,

    /// Human-readable message.
    pub message: String,
}

impl PluginError {
    /// Create a new plugin error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_as_wire_string() {
        for code in [
            ErrorCode::PermissionDenied,
            ErrorCode::EncoderConfigError,
            ErrorCode::NoActiveSession,
            ErrorCode::DirectoryUnavailable,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::new(ErrorCode::NoActiveSession, "No active recording to stop");
        assert_eq!(err.to_string(), "NO_ACTIVE_SESSION: No active recording to stop");
    }
}
