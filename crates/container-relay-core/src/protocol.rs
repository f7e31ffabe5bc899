//! Wire protocol for client-server communication.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionId, SessionKind, Target};

/// Interrupt sequence written on `kill` (ctrl-c).
pub const INTERRUPT_SEQUENCE: &[u8] = b"\x03";

/// Detach sequence written on `detach` (ctrl-p ctrl-q).
pub const DETACH_SEQUENCE: &[u8] = b"\x10\x11";

/// Raw frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
}

/// Session-open request, as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpen {
    pub kind: SessionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Session-open request after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub kind: SessionKind,
    pub target: Target,
    /// Present iff `kind` is interactive.
    pub command: Option<String>,
}

impl SessionOpen {
    /// Validate the target and, for interactive sessions, the shell command.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidOpen` describing the first problem found.
    pub fn validate(self) -> Result<OpenRequest, ProtocolError> {
        let target = Target::parse(&self.target)
            .ok_or_else(|| ProtocolError::InvalidOpen(format!("invalid target '{}'", self.target)))?;

        let command = match self.kind {
            SessionKind::LogTail => None,
            SessionKind::InteractiveCommand => {
                let command = self
                    .command
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| ProtocolError::InvalidOpen("command is required".to_string()))?;
                match shlex::split(&command) {
                    Some(words) if !words.is_empty() => Some(command),
                    _ => {
                        return Err(ProtocolError::InvalidOpen(format!(
                            "command cannot be parsed: {command}"
                        )));
                    }
                }
            }
        };

        Ok(OpenRequest {
            kind: self.kind,
            target,
            command,
        })
    }
}

/// Control action sent by the client during an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    /// Interrupt the remote process and end the session.
    Kill,
    /// Release the remote terminal without killing the process.
    Detach,
    /// Resize the remote terminal.
    Resize { cols: u16, rows: u16 },
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Open a session on this channel.
    Open(SessionOpen),
    /// Control signal.
    Control(ControlAction),
    /// Raw interactive input.
    Input(Bytes),
}

impl ClientMessage {
    /// Classify a client frame.
    ///
    /// JSON objects carrying `kind` are open requests, objects carrying
    /// `action` are controls; everything else is raw input.
    ///
    /// # Errors
    /// Returns error for empty frames and malformed open or control objects.
    pub fn parse(frame: ClientFrame) -> Result<Self, ProtocolError> {
        let text = match frame {
            ClientFrame::Binary(data) if data.is_empty() => return Err(ProtocolError::EmptyPayload),
            ClientFrame::Binary(data) => return Ok(Self::Input(data)),
            ClientFrame::Text(text) if text.is_empty() => return Err(ProtocolError::EmptyPayload),
            ClientFrame::Text(text) => text,
        };

        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&text) else {
            return Ok(Self::Input(Bytes::from(text)));
        };

        if object.contains_key("action") {
            let value = Value::Object(object);
            return serde_json::from_value(value)
                .map(Self::Control)
                .map_err(|e| ProtocolError::InvalidControl(e.to_string()));
        }
        if object.contains_key("kind") {
            let value = Value::Object(object);
            return serde_json::from_value(value)
                .map(Self::Open)
                .map_err(|e| ProtocolError::InvalidOpen(e.to_string()));
        }

        Ok(Self::Input(Bytes::from(text)))
    }
}

/// Message from server to client.
///
/// Each message is a JSON object with a single key: `{"data": ...}`,
/// `{"error": ...}` or `{"session": id}`. The `session` message is sent exactly
/// once, when the session becomes active and before any `data`. Clients that
/// only understand `data` and `error` should ignore objects with other keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Relayed output fragment.
    Data(String),
    /// Error notice.
    Error(String),
    /// Session became active. Always the first message of a session.
    Session(SessionId),
}

impl ServerMessage {
    /// Create an error message from anything displayable.
    #[must_use]
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error(err.to_string())
    }
}

/// Protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Empty payload")]
    EmptyPayload,
    #[error("Invalid control message: {0}")]
    InvalidControl(String),
    #[error("Invalid session request: {0}")]
    InvalidOpen(String),
}
