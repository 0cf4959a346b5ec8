//! Recorder state machine types.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// The current state of the capture orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    /// No session exists.
    #[default]
    Idle,

    /// Waiting for the user to answer the consent prompt.
    AwaitingPermission {
        /// Session awaiting consent.
        session_id: u64,
    },

    /// Consent granted, capture source and pipeline being brought up.
    Starting {
        /// Session being started.
        session_id: u64,
    },

    /// Frames are being captured and encoded.
    Recording {
        /// Active session.
        session_id: u64,

        /// File the session writes to.
        output_path: String,
    },

    /// Teardown in progress.
    Stopping {
        /// Session being stopped.
        session_id: u64,

        /// Why the session is stopping.
        reason: StopReason,
    },

    /// The last session failed.
    Failed {
        /// Stable error code.
        code: ErrorCode,

        /// Error message.
        message: String,
    },
}

impl RecorderState {
    /// Returns true if no session exists.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while waiting for consent.
    pub fn is_awaiting_permission(&self) -> bool {
        matches!(self, Self::AwaitingPermission { .. })
    }

    /// Returns true if frames are being recorded.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    /// Returns true if teardown is in progress.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if the last session failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Session id associated with the state, if any.
    pub fn session_id(&self) -> Option<u64> {
        match self {
            Self::AwaitingPermission { session_id }
            | Self::Starting { session_id }
            | Self::Recording { session_id, .. }
            | Self::Stopping { session_id, .. } => Some(*session_id),
            Self::Idle | Self::Failed { .. } => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::AwaitingPermission { .. } => "AwaitingPermission",
            Self::Starting { .. } => "Starting",
            Self::Recording { .. } => "Recording",
            Self::Stopping { .. } => "Stopping",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Reason a session is being stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Host requested stop.
    UserRequested,

    /// A new session replaced this one.
    Replaced,

    /// The engine is shutting down.
    Shutdown,

    /// Frame capture kept failing.
    CaptureFailed { message: String },

    /// Consent was revoked by the system or user.
    PermissionRevoked,

    /// The container reported a failed status.
    ContainerFailed { message: String },

    /// The encoder failed while recording.
    EncoderFailed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Recording stopped by user".to_string(),
            Self::Replaced => "Recording replaced by a new session".to_string(),
            Self::Shutdown => "Recorder shutting down".to_string(),
            Self::CaptureFailed { message } => format!("Capture error: {message}"),
            Self::PermissionRevoked => "Capture permission revoked".to_string(),
            Self::ContainerFailed { message } => format!("Container error: {message}"),
            Self::EncoderFailed { message } => format!("Encoder error: {message}"),
        }
    }

    /// Returns true if the stop was caused by a fault rather than a request.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::CaptureFailed { .. }
                | Self::PermissionRevoked
                | Self::ContainerFailed { .. }
                | Self::EncoderFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_only_for_active_states() {
        assert_eq!(RecorderState::Idle.session_id(), None);
        assert_eq!(
            RecorderState::AwaitingPermission { session_id: 4 }.session_id(),
            Some(4)
        );
        let failed = RecorderState::Failed {
            code: ErrorCode::PermissionDenied,
            message: "denied".into(),
        };
        assert_eq!(failed.session_id(), None);
        assert!(failed.is_failed());
    }

    #[test]
    fn test_fault_reasons() {
        assert!(!StopReason::UserRequested.is_fault());
        assert!(!StopReason::Replaced.is_fault());
        assert!(StopReason::PermissionRevoked.is_fault());
        assert!(StopReason::EncoderFailed {
            message: "x".into()
        }
        .is_fault());
    }
}
