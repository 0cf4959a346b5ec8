//! Recording engine for Snaply.
//!
//! The engine owns the lifecycle of a screen recording: it asks the host for
//! capture consent, binds the granted token to a capture source, feeds frames
//! through the encoder pipeline on a fixed-period scheduler and finalizes the
//! MP4 file when the session stops or fails.
//!
//! Hosts talk to the engine through a [`Recorder`] handle:
//!
//! ```ignore
//! let (recorder, engine) = spawn_recorder(parts, RecorderConfig::default(), event_tx)?;
//! let completion = recorder.start(display_metrics, files_dir)?;
//! ```

mod error;
mod files;
mod orchestrator;
mod scaling;
mod scheduler;
mod session;
mod stats;

pub use error::{ErrorCategory, RecordingError};
pub use files::{remove_file_if_exists, FilesDir, OutputPathProvider};
pub use orchestrator::{
    command_channel, create_recorder, spawn_recorder, Engine, EngineCommand, EngineParts,
    HostSurface, Recorder, COMMAND_CHANNEL_CAPACITY,
};
pub use scaling::{scale_factor, scale_for, ScaledOutput, FALLBACK_SCALE};
pub use scheduler::{FaultNotice, SchedulerConfig, SchedulerFault};
pub use session::StartCompletion;
pub use stats::RecordingStats;

/// Result type for recording operations.
pub type RecordingResult<T> = Result<T, RecordingError>;
