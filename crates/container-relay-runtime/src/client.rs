//! `RuntimeClient` implementation driving the docker or podman CLI.

use std::{collections::HashMap, path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use container_relay_core::{AttachFailure, RuntimeAttachment, RuntimeClient, Target};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    binary::{RuntimeKind, detect_runtime_binary},
    command::{CliCommand, CommandBuildError},
    exec::PtyExecStream,
    logs::LogStream,
};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Runtime adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime binary; docker then podman are looked up on `PATH` when unset.
    pub binary: Option<String>,
    /// Endpoint for targets that name no node.
    pub default_host: Option<String>,
    /// Node name to endpoint URL.
    pub nodes: HashMap<String, String>,
    /// Lines of history replayed when a log tail starts.
    pub log_tail: u32,
    /// Initial PTY width for exec sessions.
    pub pty_cols: u16,
    /// Initial PTY height for exec sessions.
    pub pty_rows: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: None,
            default_host: None,
            nodes: HashMap::new(),
            log_tail: 200,
            pty_cols: 80,
            pty_rows: 24,
        }
    }
}

/// Runtime setup error.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("No container runtime binary found (tried {0})")]
    BinaryNotFound(String),
}

/// Container runtime client backed by the runtime's own CLI.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    kind: RuntimeKind,
    binary: PathBuf,
    config: RuntimeConfig,
}

impl CliRuntime {
    /// Locate the runtime binary and build a client.
    ///
    /// # Errors
    /// Returns error if no usable binary is found.
    pub async fn detect(config: RuntimeConfig) -> Result<Self, SetupError> {
        let (kind, binary) = detect_runtime_binary(config.binary.as_deref())
            .await
            .ok_or_else(|| {
                SetupError::BinaryNotFound(
                    config
                        .binary
                        .clone()
                        .unwrap_or_else(|| "docker, podman".to_string()),
                )
            })?;
        tracing::info!(%kind, binary = %binary.display(), "Using container runtime");
        Ok(Self {
            kind,
            binary,
            config,
        })
    }

    /// Build a client around a known binary without searching.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>, config: RuntimeConfig) -> Self {
        let binary = binary.into();
        Self {
            kind: RuntimeKind::from_binary(&binary),
            binary,
            config,
        }
    }

    /// Runtime flavor in use.
    #[must_use]
    pub const fn kind(&self) -> RuntimeKind {
        self.kind
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn cli_for(&self, target: &Target) -> Result<CliCommand, AttachFailure> {
        let host = match &target.node {
            None => self.config.default_host.clone(),
            Some(node) => Some(
                self.config
                    .nodes
                    .get(node)
                    .cloned()
                    .ok_or_else(|| AttachFailure::NotFound(format!("unknown node {node}")))?,
            ),
        };
        Ok(CliCommand::new(self.binary.clone(), host))
    }

    /// Ask the runtime for the container's state.
    async fn container_status(
        &self,
        cli: &CliCommand,
        target: &Target,
    ) -> Result<String, AttachFailure> {
        let parts = cli.inspect_status(&target.container).map_err(build_failure)?;
        let mut cmd = parts.to_tokio();
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(INSPECT_TIMEOUT, cmd.output())
            .await
            .map_err(|_| AttachFailure::Unreachable(format!("{} did not answer", self.kind)))?
            .map_err(|e| {
                AttachFailure::Unreachable(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        if output.status.success() {
            let status = String::from_utf8_lossy(&output.stdout).trim().to_string();
            tracing::debug!(%target, %status, "Inspected container");
            return Ok(status);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_inspect_failure(&stderr, target))
    }
}

fn build_failure(e: CommandBuildError) -> AttachFailure {
    AttachFailure::NotFound(e.to_string())
}

/// Map runtime CLI error output to an attach failure.
#[must_use]
pub fn classify_inspect_failure(stderr: &str, target: &Target) -> AttachFailure {
    let lower = stderr.to_ascii_lowercase();
    let detail = stderr.trim().lines().last().unwrap_or_default().to_string();

    if lower.contains("permission denied") {
        AttachFailure::PermissionDenied(detail)
    } else if lower.contains("cannot connect")
        || lower.contains("error during connect")
        || lower.contains("connection refused")
        || lower.contains("is the docker daemon running")
    {
        AttachFailure::Unreachable(detail)
    } else if lower.contains("no such") || lower.contains("not found") {
        AttachFailure::NotFound(target.to_string())
    } else {
        AttachFailure::Unreachable(detail)
    }
}

#[async_trait]
impl RuntimeClient for CliRuntime {
    async fn open_log_stream(&self, target: &Target) -> Result<RuntimeAttachment, AttachFailure> {
        let cli = self.cli_for(target)?;
        self.container_status(&cli, target).await?;

        let parts = cli
            .logs(&target.container, self.config.log_tail)
            .map_err(build_failure)?;
        LogStream::spawn(&parts).map_err(|e| AttachFailure::Unreachable(e.to_string()))
    }

    async fn open_exec_stream(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<RuntimeAttachment, AttachFailure> {
        let cli = self.cli_for(target)?;
        let status = self.container_status(&cli, target).await?;
        if status != "running" {
            return Err(AttachFailure::NotRunning(format!("{target} is {status}")));
        }

        let parts = cli
            .exec(&target.container, command)
            .map_err(build_failure)?;
        PtyExecStream::spawn(&parts, self.config.pty_cols, self.config.pty_rows)
            .map_err(|e| AttachFailure::Unreachable(e.to_string()))
    }
}
