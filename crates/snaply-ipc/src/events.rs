//! Events sent from the recorder to the host.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::state::RecorderState;
use crate::types::RecordingStatsSnapshot;

/// Events that the recorder can send to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderEvent {
    /// Recorder state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<RecorderState>,

        /// Current state.
        current: Box<RecorderState>,
    },

    /// Frames are flowing for a session.
    RecordingStarted {
        /// Session id.
        session_id: u64,

        /// Output file.
        output_path: String,

        /// Encoded width.
        width: u32,

        /// Encoded height.
        height: u32,
    },

    /// A session was finalized.
    RecordingFinished {
        /// Session id.
        session_id: u64,

        /// Output file.
        output_path: String,

        /// Final counters.
        stats: RecordingStatsSnapshot,
    },

    /// A session failed.
    RecordingFailed {
        /// Session id.
        session_id: u64,

        /// Stable error code.
        code: ErrorCode,

        /// Error message.
        message: String,
    },

    /// Periodic counters for the active session.
    Stats(RecordingStatsSnapshot),

    /// Recorder engine is ready.
    Ready,

    /// Recorder engine has shut down.
    Shutdown,
}
