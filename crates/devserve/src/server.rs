//! HTTP server: listener, accept loop and request dispatch

use crate::config::ServeConfig;
use crate::error::{Error, Result};
use crate::static_files::{error_response, serve_file, FileBody};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, ALLOW};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Methods the server answers
pub const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";

/// Add the CORS headers every response carries
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
}

/// Fail unless `root` is an existing directory
pub fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(Error::MissingRoot {
            path: root.to_path_buf(),
        })
    }
}

/// Handle a single request
///
/// Never fails: every problem becomes an HTTP status for this request only.
pub async fn handle_request<B>(
    config: Arc<ServeConfig>,
    req: Request<B>,
) -> std::result::Result<Response<FileBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path();

    let mut response = match method {
        Method::GET | Method::HEAD => {
            serve_file(
                &config.root,
                path,
                &config.index_file,
                &config.cache,
                method == Method::GET,
            )
            .await
        }
        Method::OPTIONS => Response::new(Full::new(Bytes::new())),
        _ => {
            let mut response = error_response(StatusCode::NOT_IMPLEMENTED, "Unsupported method");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            response
        }
    };
    apply_cors(response.headers_mut());

    debug!(%method, path, status = response.status().as_u16(), "request");
    Ok(response)
}

/// A bound server, ready to accept connections
pub struct Server {
    listener: TcpListener,
    config: Arc<ServeConfig>,
}

impl Server {
    /// Check the root directory, then bind the configured address
    ///
    /// A missing root fails before any socket is touched.
    pub async fn bind(config: ServeConfig) -> Result<Self> {
        ensure_root(&config.root)?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::from_bind(addr, e))?;

        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Configuration this server was bound with
    pub fn config(&self) -> &ServeConfig {
        &self.config
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Each connection gets its own task; accept and connection errors are
    /// logged and never stop the loop.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, remote_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    // e.g. out of file descriptors; give the system a moment
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let config = self.config.clone();
            tokio::spawn(serve_connection(stream, remote_addr, config));
        }

        info!("stopped accepting connections");
    }
}

async fn serve_connection(stream: TcpStream, remote_addr: SocketAddr, config: Arc<ServeConfig>) {
    let io = TokioIo::new(stream);
    let connection_timeout = config.connection_timeout();
    let header_read_timeout = config.header_read_timeout();

    let service = service_fn(move |req| {
        let config = config.clone();
        async move { handle_request(config, req).await }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);
    let connection = builder.serve_connection(io, service);

    match tokio::time::timeout(connection_timeout, connection).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%remote_addr, "Connection error: {}", e),
        Err(_) => debug!(%remote_addr, "connection timed out"),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
