//! Snaply host bridge.
//!
//! Dispatches the host's method calls to the recording engine, the
//! screenshot transform and the host collaborators for sharing and device
//! information.

mod commands;
mod device;
mod error;
mod share;

use crossbeam_channel::{Receiver, TryRecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use commands::{PluginParts, SnaplyPlugin};
pub use device::{
    collect_device_info, format_gigabytes, DeviceInfoProvider, DeviceInfoSection, LocalDeviceInfo,
};
pub use error::HostError;
pub use share::{mime_type_for, FileSharer, ShareRequest};

use snaply_ipc::RecorderEvent;

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "snaply=debug,snaply_engine=debug,snaply_capture=debug,snaply_encoder=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Collect all pending recorder events without blocking.
///
/// Returns `None` once the engine has dropped its event sender and every
/// event was consumed.
pub fn poll_events(rx: &Receiver<RecorderEvent>) -> Option<Vec<RecorderEvent>> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => return Some(events),
            Err(TryRecvError::Disconnected) => {
                return if events.is_empty() { None } else { Some(events) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_events_drains_and_detects_disconnect() {
        let (tx, rx) = snaply_ipc::event_channel();
        tx.send(RecorderEvent::Ready).unwrap();
        tx.send(RecorderEvent::Shutdown).unwrap();

        assert_eq!(poll_events(&rx).map(|e| e.len()), Some(2));
        assert_eq!(poll_events(&rx).map(|e| e.len()), Some(0));

        drop(tx);
        assert!(poll_events(&rx).is_none());
    }
}
