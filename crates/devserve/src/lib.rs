//! Local development server for a pre-built static web bundle
//!
//! Serves a directory (by default `build/web`) on port 8090 with:
//! - directory requests answered by their `index.html`
//! - no-cache headers on every file, and never a `304`
//! - permissive CORS headers on every response
//!
//! Before binding, whatever process still listens on the port is stopped
//! (see [`reclaim`]), so restarting after a rebuild just works.

pub mod cache_policy;
pub mod config;
mod error;
pub mod reclaim;
pub mod server;
pub mod static_files;

pub use cache_policy::CachePolicy;
pub use config::{ConfigError, ServeConfig};
pub use error::{Error, Result};
pub use reclaim::{platform_inspector, reclaim_port, PortInspector, ReclaimError, ReclaimReport};
pub use server::{shutdown_signal, Server};
