//! Capture sources.

use crossbeam_channel::Receiver;

use crate::frame::CapturedFrame;
use crate::CaptureResult;

/// Pull-based source: hands out the current visual buffer on demand.
///
/// Used for frame sampling, where the recorder snapshots the UI surface on
/// every scheduler tick.
pub trait FrameSource: Send {
    /// Acquire the current frame.
    fn acquire_frame(&mut self) -> CaptureResult<CapturedFrame>;

    /// Release the source. Called once when the session ends.
    fn release(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

/// Push-based source: mirrors the display and delivers frames as they are
/// composited.
pub trait MirrorSource: Send {
    /// Start mirroring. Frames are delivered through the returned channel,
    /// which holds at most `capacity` frames; extra frames are dropped by the
    /// source. A disconnected channel means consent was revoked.
    fn start(&mut self, capacity: usize) -> CaptureResult<Receiver<CapturedFrame>>;

    /// Stop mirroring.
    fn stop(&mut self) -> CaptureResult<()>;

    /// Check if mirroring is active.
    fn is_active(&self) -> bool;
}

/// A bound capture source.
pub enum CaptureSource {
    /// Frame sampling.
    Pull(Box<dyn FrameSource>),

    /// Display mirroring.
    Mirror(Box<dyn MirrorSource>),
}

impl CaptureSource {
    /// Returns a short name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pull(_) => "pull",
            Self::Mirror(_) => "mirror",
        }
    }

    /// Release the underlying source.
    pub fn release(&mut self) -> CaptureResult<()> {
        match self {
            Self::Pull(source) => source.release(),
            Self::Mirror(source) => {
                if source.is_active() {
                    source.stop()
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CaptureSource").field(&self.kind()).finish()
    }
}
