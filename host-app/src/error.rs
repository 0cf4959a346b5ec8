//! Errors raised by host collaborators.

use thiserror::Error;

/// Failure reported by a host-side collaborator.
#[derive(Debug, Error)]
pub enum HostError {
    /// The share sheet could not be shown.
    #[error("Share UI unavailable: {0}")]
    UiUnavailable(String),

    /// A device info section could not be read.
    #[error("Section unavailable: {0}")]
    SectionUnavailable(String),
}
