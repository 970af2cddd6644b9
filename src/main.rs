//! tally-proxy
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                 TALLY PROXY                  │
//!     Browser / Electron  │  ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//!     ────────────────────┼─▶│ listener │──▶│ classify │──▶│forwarder │  │
//!                         │  └──────────┘   └────┬─────┘   └────┬─────┘  │
//!                         │        OPTIONS → 204 │              │        │
//!                         │        /health → 200 │              ▼        │
//!                         │                      │        ┌──────────┐   │     Tally
//!     ◀───────────────────┼──── CORS headers ◀───┴────────│   pool   │◀──┼──── 127.0.0.1:9000
//!                         │                               └──────────┘   │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use tally_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use tally_proxy::lifecycle::{signals, Shutdown};
use tally_proxy::net::{self, ListenerError};
use tally_proxy::observability::{logging, metrics};
use tally_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "tally-proxy")]
#[command(about = "CORS-relaxing keep-alive proxy for the Tally XML API", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address (e.g. 0.0.0.0:3001).
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the upstream port.
    #[arg(long)]
    upstream_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    if let Some(port) = cli.upstream_port {
        config.upstream.port = port;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability.log_level);

    tracing::info!("tally-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.authority(),
        max_connections = config.pool.max_connections,
        request_timeout_ms = config.upstream.request_timeout_ms,
        "Configuration loaded"
    );

    let listener = match net::bind(&config.listener).await {
        Ok(listener) => listener,
        Err(e @ ListenerError::AddrInUse { .. }) => {
            tracing::error!("{e}");
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            return Err(e.into());
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        address = %listener.local_addr()?,
        "Proxy listening"
    );
    tracing::info!("Forwarding to http://{}", config.upstream.authority());

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_listener(shutdown);

    let server = HttpServer::new(config);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
