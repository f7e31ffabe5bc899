//! Session data model.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// What a session attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    /// One-way tail of a container's log output.
    #[serde(rename = "logtail")]
    LogTail,
    /// Two-way interactive command running inside a container.
    #[serde(rename = "command")]
    InteractiveCommand,
}

impl SessionKind {
    /// Whether client input is relayed to the runtime for this kind.
    #[must_use]
    pub const fn accepts_input(self) -> bool {
        matches!(self, Self::InteractiveCommand)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogTail => write!(f, "logtail"),
            Self::InteractiveCommand => write!(f, "command"),
        }
    }
}

/// Lifecycle state of a session.
///
/// Transitions only move forward: `Opening -> Active -> Terminating -> Closed`,
/// with `Opening -> Closed` on attach failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opening,
    Active,
    Terminating,
    Closed,
}

/// A container on a node, written `[node/]container` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Node the container runs on; `None` selects the default endpoint.
    pub node: Option<String>,
    /// Container id or name.
    pub container: String,
}

impl Target {
    /// Parse a `[node/]container` reference.
    ///
    /// Returns `None` when either part is empty.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (node, container) = match raw.split_once('/') {
            Some((node, container)) => (Some(node.trim()), container.trim()),
            None => (None, raw),
        };
        if container.is_empty() || node.is_some_and(str::is_empty) {
            return None;
        }
        Some(Self {
            node: node.map(str::to_string),
            container: container.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{node}/{}", self.container),
            None => write!(f, "{}", self.container),
        }
    }
}

/// Snapshot of an active session, as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Session kind.
    pub kind: SessionKind,
    /// Attached container.
    pub target: Target,
    /// Shell command, for interactive sessions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Start timestamp (Unix epoch seconds).
    pub started_at: i64,
}

impl SessionInfo {
    /// Build a snapshot stamped with the current time.
    #[must_use]
    pub fn new(id: SessionId, kind: SessionKind, target: Target, command: Option<String>) -> Self {
        Self {
            id,
            kind,
            target,
            command,
            started_at: now(),
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
