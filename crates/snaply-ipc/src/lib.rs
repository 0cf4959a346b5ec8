//! Typed host<->recorder messages for Snaply.
//!
//! This crate defines the remote-call surface exposed to the host
//! application, the events the recorder emits, and the configuration and
//! error codes shared by every other crate.

mod commands;
mod error;
mod events;
mod state;
mod types;

pub use commands::{MethodCall, MethodResponse, MethodResult};
pub use error::{ErrorCode, PluginError};
pub use events::RecorderEvent;
pub use state::{RecorderState, StopReason};
pub use types::{BitrateProfile, DeviceInfo, RecorderConfig, RecordingStatsSnapshot};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (recorder → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<RecorderEvent>, Receiver<RecorderEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
