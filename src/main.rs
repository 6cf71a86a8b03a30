//! Edge proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ http::server ──▶ FilterProcessor
//!                                 │
//!                                 ├─ inbound filters   (debug, proxy headers, routing, ...)
//!                                 ├─ endpoint          (ProxyEndpoint ──▶ Origin ──▶ server)
//!                                 └─ outbound filters  (debug, ...)
//!   Client ◀── http::server ◀─────┘
//!
//!   Cross-cutting: config, observability, resilience, health, lifecycle
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use edge_proxy::config::{load_config, ProxyConfig};
use edge_proxy::http::HttpServer;
use edge_proxy::lifecycle::Shutdown;
use edge_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "edge-proxy")]
#[command(about = "Filter-pipeline edge reverse proxy", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        origins = config.origins.len(),
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signals = shutdown.clone();
    tokio::spawn(async move { signals.listen_for_signals().await });

    HttpServer::new(&config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
