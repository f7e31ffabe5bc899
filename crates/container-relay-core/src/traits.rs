//! Capability traits consumed by the session relay.
//!
//! A relay owns exactly one `Transport` (the client connection) and, once
//! attached, exactly one `RuntimeStream` (the remote exec or log stream).

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::{
    error::AttachFailure,
    protocol::{ClientFrame, DETACH_SEQUENCE, INTERRUPT_SEQUENCE, ServerMessage},
    session::Target,
};

/// Event observed on the client side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived from the client.
    Frame(ClientFrame),
    /// The client went away.
    Disconnected,
}

/// Inbound client events, in arrival order.
pub type TransportEvents = BoxStream<'static, TransportEvent>;

/// How the relay closes a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Session ended cleanly.
    Normal,
    /// Session ended with an error that was already reported.
    Error,
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Client disconnected")]
    Disconnected,
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Outbound half of a full-duplex client connection.
///
/// Disconnection is observed asynchronously through `TransportEvents`, so
/// `close` must tolerate being called after the client already left.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the client.
    async fn send(&self, msg: ServerMessage) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    async fn close(&self, reason: CloseReason);

    /// Whether the client is still connected.
    fn is_connected(&self) -> bool;
}

/// Event observed on a runtime stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Output chunk.
    Data(Bytes),
    /// The remote process exited or the log source closed.
    End,
    /// The stream failed.
    Error(String),
}

/// Runtime stream error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PTY error: {0}")]
    Pty(String),
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("Stream closed")]
    Closed,
}

/// Write side of an attached runtime stream.
#[async_trait]
pub trait RuntimeStream: Send + Sync {
    /// Write raw bytes to the remote process input.
    async fn write(&self, data: &[u8]) -> Result<(), RuntimeError>;

    /// Send the interrupt sequence.
    async fn write_interrupt(&self) -> Result<(), RuntimeError> {
        self.write(INTERRUPT_SEQUENCE).await
    }

    /// Send the detach sequence.
    async fn write_detach(&self) -> Result<(), RuntimeError> {
        self.write(DETACH_SEQUENCE).await
    }

    /// Resize the remote terminal, where there is one.
    async fn resize(&self, _cols: u16, _rows: u16) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Request the stream to close.
    async fn close(&self) -> Result<(), RuntimeError>;
}

/// A freshly attached runtime stream.
pub struct RuntimeAttachment {
    /// Write side, owned by the session.
    pub stream: Box<dyn RuntimeStream>,
    /// Output events, in arrival order.
    pub events: BoxStream<'static, RuntimeEvent>,
}

impl std::fmt::Debug for RuntimeAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeAttachment").finish_non_exhaustive()
    }
}

/// Client for a container runtime able to stream logs and run commands.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Attach to the log output of `target`.
    async fn open_log_stream(&self, target: &Target) -> Result<RuntimeAttachment, AttachFailure>;

    /// Run `command` interactively inside `target`.
    async fn open_exec_stream(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<RuntimeAttachment, AttachFailure>;
}
