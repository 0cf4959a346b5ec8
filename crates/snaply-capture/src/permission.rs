//! Capture consent handshake.
//!
//! Consent is single-use and scoped to one session. Every request carries a
//! [`ConsentTicket`] with the session generation; the token granted for that
//! ticket remembers the generation so a late answer for an abandoned session
//! can be told apart from the current one.

use bytes::Bytes;

use crate::source::CaptureSource;
use crate::CaptureResult;

/// Identifies the session a consent request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsentTicket {
    generation: u64,
}

impl ConsentTicket {
    /// Create a ticket for the given session generation.
    pub fn new(generation: u64) -> Self {
        Self { generation }
    }

    /// Session generation this ticket was issued for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wrap a platform credential into a token for this ticket.
    pub fn grant(self, credential: Bytes) -> ConsentToken {
        ConsentToken {
            generation: self.generation,
            credential,
        }
    }
}

/// Opaque, single-use credential authorizing one capture session.
///
/// Not `Clone`: binding a token consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct ConsentToken {
    generation: u64,
    credential: Bytes,
}

impl ConsentToken {
    /// Session generation the token was granted for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Platform credential (for example the serialized projection grant).
    pub fn credential(&self) -> &Bytes {
        &self.credential
    }
}

/// Immediate answer to a consent request.
#[derive(Debug)]
pub enum ConsentRequest {
    /// Consent was already available.
    Granted(ConsentToken),

    /// Consent was refused without prompting.
    Denied,

    /// A prompt is showing; the answer arrives later as a [`ConsentResult`].
    Pending,
}

/// Asynchronous answer to a pending consent request.
#[derive(Debug)]
pub struct ConsentResult {
    /// Ticket the answer belongs to.
    pub ticket: ConsentTicket,

    /// Token, present only when the user granted consent.
    pub token: Option<ConsentToken>,
}

impl ConsentResult {
    /// The user granted consent.
    pub fn granted(token: ConsentToken) -> Self {
        Self {
            ticket: ConsentTicket::new(token.generation()),
            token: Some(token),
        }
    }

    /// The user denied consent.
    pub fn denied(ticket: ConsentTicket) -> Self {
        Self {
            ticket,
            token: None,
        }
    }

    /// Returns true if consent was granted.
    pub fn is_granted(&self) -> bool {
        self.token.is_some()
    }
}

/// Parameters for binding a token to a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    /// Width of the encoder input.
    pub width: u32,

    /// Height of the encoder input.
    pub height: u32,

    /// Display density, used by mirroring sources.
    pub density_dpi: u32,
}

/// Host-side consent prompt and capture source factory.
pub trait PermissionGate: Send {
    /// Ask the user for capture consent.
    ///
    /// Returning [`ConsentRequest::Pending`] means the host will later call
    /// back with a [`ConsentResult`] for `ticket`.
    fn request_capture(&mut self, ticket: ConsentTicket) -> ConsentRequest;

    /// Turn a granted token into a live capture source.
    fn bind_token(&mut self, token: ConsentToken, request: BindRequest)
        -> CaptureResult<CaptureSource>;
}
