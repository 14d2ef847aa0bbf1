//! Latchkey door server.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:9500, registry and pending log in the working directory
//! latchkey-server
//!
//! # Custom files and master secret
//! latchkey-server --registry /var/lib/latchkey/registered-widgets.txt \
//!     --pending /var/lib/latchkey/requested-widgets.txt --master-pin 31415926
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use latchkey_cli::{env_filter, shutdown_signal};
use latchkey_core::Pin;
use latchkey_core::constants::{
    DEFAULT_MASTER_PIN, DEFAULT_PENDING_FILE, DEFAULT_REGISTRY_FILE, DEFAULT_SERVER_PORT,
};
use latchkey_network::{TcpServer, TcpServerConfig};
use latchkey_registry::{
    DeviceRegistry, HandlerConfig, JsonLinesPendingLog, JsonLinesStore, RequestHandler,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Latchkey door server
#[derive(Parser, Debug)]
#[command(name = "latchkey-server")]
#[command(about = "Door access server for keypad widgets")]
#[command(version)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, env = "LATCHKEY_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "LATCHKEY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Registered devices, one JSON object per line
    #[arg(long, env = "LATCHKEY_REGISTRY", default_value = DEFAULT_REGISTRY_FILE)]
    registry: PathBuf,

    /// Registration requests are appended here
    #[arg(long, env = "LATCHKEY_PENDING", default_value = DEFAULT_PENDING_FILE)]
    pending: PathBuf,

    /// Secret that authorizes a PIN reset without the current PIN
    #[arg(long, env = "LATCHKEY_MASTER_PIN", default_value = DEFAULT_MASTER_PIN, hide_env_values = true)]
    master_pin: String,

    /// Maximum concurrent widget connections
    #[arg(long, env = "LATCHKEY_MAX_CONNECTIONS", default_value_t = 100)]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LATCHKEY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter(&args.log_level))
        .init();

    info!("Latchkey door server {} starting", latchkey_core::VERSION);

    let registry = DeviceRegistry::load(JsonLinesStore::new(&args.registry))
        .await
        .with_context(|| format!("Failed to load registry {}", args.registry.display()))?;
    info!(
        path = %args.registry.display(),
        devices = registry.len().await,
        "Registry loaded"
    );

    let handler = RequestHandler::new(
        Arc::new(registry),
        Arc::new(JsonLinesPendingLog::new(&args.pending)),
        HandlerConfig {
            master_pin: Pin::new(args.master_pin),
        },
    );

    let server = TcpServer::bind(TcpServerConfig {
        bind_addr: SocketAddr::new(args.bind, args.port),
        max_connections: args.max_connections,
        ..TcpServerConfig::default()
    })
    .await?;

    server.serve(Arc::new(handler), shutdown_signal()).await?;
    info!("Door server stopped");
    Ok(())
}
