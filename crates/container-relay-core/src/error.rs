//! Session-level error taxonomy.

use thiserror::Error;

/// Why a runtime stream could not be attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachFailure {
    #[error("Runtime unreachable: {0}")]
    Unreachable(String),
    #[error("Target not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Target is not running: {0}")]
    NotRunning(String),
}

/// Errors that end or disturb a session.
///
/// Every variant is fatal to at most one session, never to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The runtime stream could not be opened; the session never became active.
    #[error("Attach failed: {0}")]
    Attach(#[from] AttachFailure),
    /// I/O error on an active runtime stream; handled like end-of-stream.
    #[error("Stream fault: {0}")]
    StreamFault(String),
    /// Malformed or empty client message; reported, session continues.
    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),
    /// The client went away. Never sent anywhere.
    #[error("Transport lost")]
    TransportLoss,
}

impl RelayError {
    /// Whether the client should be told about this error.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        !matches!(self, Self::TransportLoss)
    }
}
