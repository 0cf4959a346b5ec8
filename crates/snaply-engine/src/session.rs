//! Recording session bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use snaply_capture::{BindRequest, DisplayMetrics};
use snaply_encoder::EncoderSettings;

use crate::scaling::ScaledOutput;
use crate::scheduler::FrameScheduler;
use crate::stats::RecordingStats;
use crate::RecordingResult;

/// Completion handle returned by a start request.
///
/// Resolves to `Ok(true)` once frames are flowing, or to the error that
/// ended the session before that.
pub type StartCompletion = oneshot::Receiver<RecordingResult<bool>>;

/// One recording, from the start request until it is finalized.
pub struct RecordingSession {
    /// Session id, also the consent generation.
    pub id: u64,

    /// File the session writes to.
    pub output_path: PathBuf,

    /// Encoder target.
    pub target: ScaledOutput,

    /// Display snapshot taken at start.
    pub metrics: DisplayMetrics,

    /// Period between frames.
    pub frame_interval: Duration,

    /// Declared frame rate.
    pub frame_rate: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,

    /// Set when frames start flowing.
    pub started_at: Option<Instant>,

    /// Session counters.
    pub stats: Arc<RecordingStats>,

    completion: Option<oneshot::Sender<RecordingResult<bool>>>,
    scheduler: Option<FrameScheduler>,
}

impl RecordingSession {
    /// Create a session awaiting consent.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        output_path: PathBuf,
        target: ScaledOutput,
        metrics: DisplayMetrics,
        frame_interval: Duration,
        frame_rate: u32,
        keyframe_interval_secs: u32,
        completion: oneshot::Sender<RecordingResult<bool>>,
    ) -> Self {
        Self {
            id,
            output_path,
            target,
            metrics,
            frame_interval,
            frame_rate,
            keyframe_interval_secs,
            started_at: None,
            stats: Arc::new(RecordingStats::new()),
            completion: Some(completion),
            scheduler: None,
        }
    }

    /// Encoder settings for this session.
    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            width: self.target.width,
            height: self.target.height,
            bitrate: self.target.bitrate,
            frame_rate: self.frame_rate,
            keyframe_interval_secs: self.keyframe_interval_secs,
        }
    }

    /// Parameters for binding a consent token.
    pub fn bind_request(&self) -> BindRequest {
        BindRequest {
            width: self.target.width,
            height: self.target.height,
            density_dpi: self.metrics.density_dpi,
        }
    }

    /// Output path.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Frames drawn into the encoder.
    pub fn frame_count(&self) -> u64 {
        self.stats.frames_submitted()
    }

    /// Resolve the start completion. Later calls are ignored.
    pub fn complete(&mut self, result: RecordingResult<bool>) {
        if let Some(tx) = self.completion.take() {
            if tx.send(result).is_err() {
                debug!(session_id = self.id, "Start completion receiver dropped");
            }
        }
    }

    /// Attach the running scheduler.
    pub fn attach_scheduler(&mut self, scheduler: FrameScheduler) {
        self.started_at = Some(Instant::now());
        self.stats.start();
        self.scheduler = Some(scheduler);
    }

    /// Detach the scheduler for teardown.
    pub fn take_scheduler(&mut self) -> Option<FrameScheduler> {
        self.scheduler.take()
    }
}
