//! Console configuration: defaults, then an optional TOML file, then environment.

use std::{net::SocketAddr, path::Path};

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use container_relay_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `CONTAINER_RELAY__SERVER__BIND`.
pub const ENV_PREFIX: &str = "CONTAINER_RELAY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ConsoleConfig {
    /// Load from `path` (if given) and the process environment.
    ///
    /// # Errors
    /// Returns error if the file is missing or unreadable, or a value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.bind", "127.0.0.1:3000")?
            .set_default("logging.level", "info")?
            .set_default("runtime.log_tail", 200_i64)?
            .set_default("runtime.pty_cols", 80_i64)?
            .set_default("runtime.pty_rows", 24_i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder
            .add_source(env.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
