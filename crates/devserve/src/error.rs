//! Error types for devserve
//!
//! Only startup errors live here. Per-request failures (missing files, read
//! errors) are turned into HTTP responses inside the request handler and never
//! reach the accept loop. Port reclaim failures have their own type in
//! [`crate::reclaim`] because they are advisory.

use crate::config::ConfigError;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for devserve startup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors that stop the server before or while binding
#[derive(Debug, Error)]
pub enum Error {
    /// The directory to serve does not exist (or is not a directory)
    #[error("build directory '{}' not found; build the web bundle first (e.g. `flutter build web`)", .path.display())]
    MissingRoot { path: PathBuf },

    /// The port is still held by another process after reclaim
    #[error("address {addr} is still in use after attempting to stop the process holding it")]
    AddressInUse { addr: SocketAddr },

    /// Any other failure to bind the listener
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Classify a bind failure, separating "address in use" from other OS errors
    pub fn from_bind(addr: SocketAddr, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            Error::AddressInUse { addr }
        } else {
            Error::Bind { addr, source }
        }
    }
}
