//! Container runtime client driving the docker or podman CLI.
//!
//! Provides:
//! - `CliRuntime` - `RuntimeClient` over the runtime's own command line tool
//! - `LogStream` and `PtyExecStream` - the two stream kinds it attaches
//! - Binary detection and command building helpers

pub mod binary;
pub mod client;
pub mod command;
pub mod exec;
pub mod logs;

pub use binary::{RuntimeKind, detect_runtime_binary, resolve_executable_path};
pub use client::{CliRuntime, RuntimeConfig, SetupError, classify_inspect_failure};
pub use command::{CliCommand, CommandBuildError, CommandParts, validate_container};
pub use exec::PtyExecStream;
pub use logs::LogStream;
