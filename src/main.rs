//! Nomad Proxy
//!
//! ```text
//!     Browser ──▶ net::listener ──▶ http::server ──▶ session::resolve
//!                                                        │
//!                       ┌────────────────────────────────┼───────────────────┐
//!                       ▼                                ▼                   ▼
//!               selection form                 forward::pool         forward::streaming
//!               / redirect / 400               (buffered GET)        (chunked relay)
//!                                                        │                   │
//!     Browser ◀──────────── http::response ◀─────────────┴───────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use nomad_proxy::config::load_config;
use nomad_proxy::lifecycle::{shutdown_signal, Shutdown};
use nomad_proxy::observability::{init_logging, metrics};
use nomad_proxy::{HttpServer, Listener};

#[derive(Debug, Parser)]
#[command(name = "nomad-proxy", version, about = "Single-target HTTP forwarding proxy")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the file and environment.
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level or filter directive, e.g. `debug` or `nomad_proxy=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nomad-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        upstream_timeout_secs = config.upstream.timeout_secs,
        stream_suffixes = ?config.upstream.stream_suffixes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(&config)?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
