//! Locating the container runtime CLI.

use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Container runtime flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Binary name looked up on `PATH`.
    #[must_use]
    pub const fn default_binary(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Guess the flavor from a binary path; anything unrecognized is treated as docker.
    #[must_use]
    pub fn from_binary(path: &Path) -> Self {
        if path.file_stem() == Some(OsStr::new("podman")) {
            Self::Podman
        } else {
            Self::Docker
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_binary())
    }
}

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute, or containing a separator).
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

/// Find the runtime binary to drive.
///
/// An explicit `configured` binary must resolve; otherwise docker is tried
/// first, then podman.
pub async fn detect_runtime_binary(configured: Option<&str>) -> Option<(RuntimeKind, PathBuf)> {
    if let Some(configured) = configured {
        let path = resolve_executable_path(configured).await?;
        return Some((RuntimeKind::from_binary(&path), path));
    }

    for kind in [RuntimeKind::Docker, RuntimeKind::Podman] {
        if let Some(path) = resolve_executable_path(kind.default_binary()).await {
            tracing::debug!(%kind, path = %path.display(), "Detected container runtime");
            return Some((kind, path));
        }
    }
    None
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}
