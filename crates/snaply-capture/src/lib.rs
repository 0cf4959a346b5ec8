//! Capture sources, consent handshake and still screenshots.
//!
//! A capture session starts with a consent request through a
//! [`PermissionGate`]. The granted [`ConsentToken`] is bound to a
//! [`CaptureSource`], which either hands out frames on demand (frame
//! sampling) or pushes frames into a channel (display mirroring).

mod error;
mod frame;
mod metrics;
mod permission;
pub mod screenshot;
mod source;

pub use error::CaptureError;
pub use frame::{CaptureTimestamp, CapturedFrame, BYTES_PER_PIXEL};
pub use metrics::{DisplayMetrics, DisplayMetricsProvider};
pub use permission::{
    BindRequest, ConsentRequest, ConsentResult, ConsentTicket, ConsentToken, PermissionGate,
};
pub use source::{CaptureSource, FrameSource, MirrorSource};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
