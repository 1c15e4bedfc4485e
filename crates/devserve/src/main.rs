//! devserve binary
//!
//! No command line flags. Configuration comes from defaults, an optional RON
//! file named by `DEVSERVE_CONFIG`, and `DEVSERVE_PORT` / `DEVSERVE_ROOT`.
//! Log verbosity follows `RUST_LOG` (default `info`).

use devserve::{platform_inspector, reclaim_port, shutdown_signal, Result, ServeConfig, Server};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn run() -> Result<()> {
    let config = ServeConfig::from_env()?;
    devserve::server::ensure_root(&config.root)?;

    if config.reclaim_port && config.port != 0 {
        let port = config.port;
        let delay = config.reclaim_delay();
        let reclaimed = tokio::task::spawn_blocking(move || {
            let inspector = platform_inspector();
            reclaim_port(inspector.as_ref(), port, delay)
        })
        .await;
        if let Err(e) = reclaimed {
            warn!("Port reclaim did not finish: {}", e);
        }
    }

    let server = Server::bind(config).await?;
    let port = server.local_addr().map(|a| a.port()).unwrap_or(server.config().port);

    println!("Starting server on http://localhost:{}", port);
    println!("Serving directory: {}", server.config().root.display());
    println!("Caching: DISABLED (no-cache headers on every response)");
    if server.config().cache.caching_enabled() {
        warn!("cache_durations has non-zero entries; they are logged but never sent");
    }
    println!("Press Ctrl+C to stop the server");
    println!();

    server.run_until(shutdown_signal()).await;

    println!("\nServer stopped.");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
