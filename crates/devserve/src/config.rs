//! Server configuration
//!
//! A [`ServeConfig`] is built once at startup and handed to the server. It is
//! assembled in three layers:
//!
//! 1. built-in defaults (port 8090, `build/web` next to the executable or in
//!    the current directory)
//! 2. an optional RON file named by `DEVSERVE_CONFIG`
//! 3. `DEVSERVE_PORT` / `DEVSERVE_ROOT` environment overrides
//!
//! Every field of the RON file is optional:
//!
//! ```ron
//! (
//!     port: 8090,
//!     root: "build/web",
//!     reclaim_port: true,
//!     cache_durations: { ".html": 0, ".js": 0 },
//! )
//! ```

use crate::cache_policy::CachePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8090;
/// Default bundle directory, relative to the working directory
pub const DEFAULT_ROOT: &str = "build/web";
/// File served for directory requests
pub const DEFAULT_INDEX_FILE: &str = "index.html";

/// Environment variable naming a RON config file
pub const CONFIG_ENV: &str = "DEVSERVE_CONFIG";
/// Environment variable overriding the port
pub const PORT_ENV: &str = "DEVSERVE_PORT";
/// Environment variable overriding the root directory
pub const ROOT_ENV: &str = "DEVSERVE_ROOT";

/// Configuration for one server instance
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Address to listen on
    pub host: IpAddr,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Directory to serve
    pub root: PathBuf,
    /// File looked up inside a requested directory
    pub index_file: String,
    /// Stop whatever is listening on `port` before binding
    pub reclaim_port: bool,
    /// Pause after terminating a process so the OS can release the socket
    pub reclaim_delay_ms: u64,
    /// Time allowed for a client to send request headers
    pub header_read_timeout_ms: u64,
    /// Upper bound on the lifetime of a single connection
    pub connection_timeout_ms: u64,
    /// Per-extension cache durations
    #[serde(rename = "cache_durations")]
    pub cache: CachePolicy,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            root: PathBuf::from(DEFAULT_ROOT),
            index_file: DEFAULT_INDEX_FILE.to_string(),
            reclaim_port: true,
            reclaim_delay_ms: 500,
            header_read_timeout_ms: 10_000,
            connection_timeout_ms: 60_000,
            cache: CachePolicy::default(),
        }
    }
}

impl ServeConfig {
    /// Defaults serving `root`, used by tests and embedders
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from RON text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ServeConfig =
            ron::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build the startup configuration from the process environment
    ///
    /// A relative root named by `DEVSERVE_ROOT` is taken from the current
    /// directory. Otherwise it is looked up next to the executable first, then
    /// in the current directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path))?,
            None => Self::default(),
        };
        let root_override = std::env::var_os(ROOT_ENV).map(PathBuf::from);
        let exe_dir = match root_override {
            Some(_) => None,
            None => std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        };
        config.apply_overrides(std::env::var(PORT_ENV).ok().as_deref(), root_override)?;

        if config.root.is_relative() {
            let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
                path: PathBuf::from("."),
                source,
            })?;
            config.root = resolve_root(&config.root, exe_dir.as_deref(), &cwd);
        }
        Ok(config)
    }

    /// Apply environment-style overrides on top of the current values
    pub fn apply_overrides(
        &mut self,
        port: Option<&str>,
        root: Option<PathBuf>,
    ) -> Result<(), ConfigError> {
        if let Some(port) = port {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        }
        if let Some(root) = root {
            self.root = root;
        }
        self.validate()
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index_file.is_empty() || self.index_file.contains(['/', '\\']) {
            return Err(ConfigError::Validation(format!(
                "index_file must be a plain file name, got {:?}",
                self.index_file
            )));
        }
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Validation("root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Delay after a successful reclaim
    pub fn reclaim_delay(&self) -> Duration {
        Duration::from_millis(self.reclaim_delay_ms)
    }

    /// Request header read timeout
    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_millis(self.header_read_timeout_ms)
    }

    /// Connection lifetime timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Anchor a relative bundle root
///
/// `exe_dir` wins when `<exe_dir>/<root>` is an existing directory, so a
/// binary copied next to `build/web` finds it from anywhere.
pub fn resolve_root(root: &Path, exe_dir: Option<&Path>, cwd: &Path) -> PathBuf {
    if root.is_absolute() {
        return root.to_path_buf();
    }
    if let Some(candidate) = exe_dir.map(|dir| dir.join(root)) {
        if candidate.is_dir() {
            return candidate;
        }
    }
    cwd.join(root)
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("validation error: {0}")]
    Validation(String),
}
