//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoding and muxing.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The backend rejected the requested encoder parameters.
    #[error("Unsupported encoder configuration: {0}")]
    UnsupportedConfig(String),

    /// Encoder initialization failed.
    #[error("Encoder initialization failed: {0}")]
    Initialization(String),

    /// General encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Operation called in the wrong pipeline state.
    #[error("Invalid pipeline state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Container could not be created or started.
    #[error("Container error: {0}")]
    Container(String),

    /// Container reported a failed status; nothing more can be written.
    #[error("Container failed: {0}")]
    ContainerFailed(String),

    /// Native handle release failed.
    #[error("Release failed: {0}")]
    Release(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncoderError {
    /// Returns true if the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedConfig(_)
                | Self::Initialization(_)
                | Self::InvalidState { .. }
                | Self::Container(_)
                | Self::ContainerFailed(_)
        )
    }

    /// Returns true if the error is a configuration rejection.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnsupportedConfig(_) | Self::Initialization(_))
    }
}
