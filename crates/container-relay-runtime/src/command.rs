//! Command building for the runtime CLI.

use std::path::PathBuf;

use thiserror::Error;

/// Maximum length of a container id or name.
const MAX_CONTAINER_LEN: usize = 128;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Invalid container reference: {0}")]
    InvalidContainer(String),
    #[error("Command is empty after parsing")]
    EmptyCommand,
    #[error("Command cannot be parsed: {0}")]
    InvalidCommand(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build a tokio process command.
    #[must_use]
    pub fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Build a command to spawn inside a PTY.
    #[must_use]
    pub fn to_pty(&self) -> portable_pty::CommandBuilder {
        let mut cmd = portable_pty::CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.env("TERM", "xterm-256color");
        cmd
    }
}

/// Builder for runtime CLI invocations against one endpoint.
#[derive(Debug, Clone)]
pub struct CliCommand {
    /// Runtime binary.
    pub binary: PathBuf,
    /// Remote endpoint passed as `--host`, if any.
    pub host: Option<String>,
}

impl CliCommand {
    /// Create a new command builder.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            host,
        }
    }

    fn build<I>(&self, args: I) -> CommandParts
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push("--host".to_string());
            parts.push(host.clone());
        }
        parts.extend(args.into_iter().map(Into::into));
        CommandParts::new(self.binary.clone(), parts)
    }

    /// `inspect --format {{.State.Status}} <container>`.
    ///
    /// # Errors
    /// Returns error if the container reference is invalid.
    pub fn inspect_status(&self, container: &str) -> Result<CommandParts, CommandBuildError> {
        validate_container(container)?;
        Ok(self.build(["inspect", "--format", "{{.State.Status}}", container]))
    }

    /// `logs --follow --tail <n> <container>`.
    ///
    /// # Errors
    /// Returns error if the container reference is invalid.
    pub fn logs(&self, container: &str, tail: u32) -> Result<CommandParts, CommandBuildError> {
        validate_container(container)?;
        let tail = tail.to_string();
        Ok(self.build(["logs", "--follow", "--tail", tail.as_str(), container]))
    }

    /// `exec -it <container> sh -c <command>`.
    ///
    /// # Errors
    /// Returns error if the container reference or the command is invalid.
    pub fn exec(&self, container: &str, command: &str) -> Result<CommandParts, CommandBuildError> {
        validate_container(container)?;
        validate_shell_command(command)?;
        Ok(self.build(["exec", "-it", container, "sh", "-c", command]))
    }
}

/// Check a container id or name.
///
/// Ids are hex strings, names are alphanumeric with `-`, `_` and `.`.
///
/// # Errors
/// Returns error if the reference is empty, too long, or has other characters.
pub fn validate_container(container: &str) -> Result<(), CommandBuildError> {
    if container.is_empty() || container.len() > MAX_CONTAINER_LEN {
        return Err(CommandBuildError::InvalidContainer(container.to_string()));
    }
    let valid = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if !container.chars().all(valid) || container.starts_with(['-', '.']) {
        return Err(CommandBuildError::InvalidContainer(container.to_string()));
    }
    Ok(())
}

fn validate_shell_command(command: &str) -> Result<(), CommandBuildError> {
    let words =
        shlex::split(command).ok_or_else(|| CommandBuildError::InvalidCommand(command.to_string()))?;
    if words.is_empty() {
        return Err(CommandBuildError::EmptyCommand);
    }
    Ok(())
}
