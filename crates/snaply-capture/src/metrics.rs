//! Display metrics snapshot.

use crate::CaptureResult;

/// Snapshot of the display taken once when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    /// Width in physical pixels.
    pub width_px: i32,

    /// Height in physical pixels.
    pub height_px: i32,

    /// Display density in dots per inch.
    pub density_dpi: u32,
}

impl DisplayMetrics {
    /// Create a new metrics snapshot.
    pub fn new(width_px: i32, height_px: i32, density_dpi: u32) -> Self {
        Self {
            width_px,
            height_px,
            density_dpi,
        }
    }

    /// Returns true if both dimensions are positive.
    pub fn is_valid(&self) -> bool {
        self.width_px > 0 && self.height_px > 0
    }

    /// Length of the longer side in pixels.
    pub fn longer_side(&self) -> i32 {
        self.width_px.max(self.height_px)
    }
}

/// Supplies display metrics for a new session.
pub trait DisplayMetricsProvider: Send {
    /// Query the current display.
    fn display_metrics(&self) -> CaptureResult<DisplayMetrics>;
}

impl<F> DisplayMetricsProvider for F
where
    F: Fn() -> CaptureResult<DisplayMetrics> + Send,
{
    fn display_metrics(&self) -> CaptureResult<DisplayMetrics> {
        self()
    }
}
