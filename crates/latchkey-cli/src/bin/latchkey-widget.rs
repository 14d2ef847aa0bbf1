//! Latchkey keypad widget.
//!
//! Reads keys from stdin (`0-9`, `*`, `#`), talks to the door server and
//! mirrors every log line to TCP listeners on the log port.
//!
//! # Usage
//!
//! ```bash
//! latchkey-widget --server 192.168.7.1:5000
//!
//! # From another machine
//! nc <widget-host> 6000
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use latchkey_cli::{MACHINE_ID_PATH, env_filter, machine_identity, shutdown_signal};
use latchkey_core::constants::{
    DEFAULT_DEVICE_KEY, DEFAULT_LOG_PORT, DEFAULT_RECONNECT_BACKOFF_SECS,
    DEFAULT_WIDGET_SERVER_ADDR,
};
use latchkey_core::{DeviceId, DeviceKey};
use latchkey_hardware::ConsoleKeypad;
use latchkey_keypad::{KeypadConfig, KeypadController};
use latchkey_network::{
    LogBroadcaster, LogSinkConfig, RetryPolicy, SessionChannel, TcpClientConfig,
};
use tracing::{Metadata, error, info};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Target of the log sink's own events; kept out of the sink to avoid feedback.
const LOG_SINK_TARGET: &str = "latchkey_network::log_sink";

/// Latchkey keypad widget
#[derive(Parser, Debug)]
#[command(name = "latchkey-widget")]
#[command(about = "Keypad client for the Latchkey door server")]
#[command(version)]
struct Args {
    /// Door server address
    #[arg(short, long, env = "LATCHKEY_SERVER", default_value = DEFAULT_WIDGET_SERVER_ADDR)]
    server: SocketAddr,

    /// TCP port on which log lines are broadcast
    #[arg(long, env = "LATCHKEY_LOG_PORT", default_value_t = DEFAULT_LOG_PORT)]
    log_port: u16,

    /// Device ID sent with every request (default: machine identity)
    #[arg(long, env = "LATCHKEY_DEVICE_ID")]
    device_id: Option<String>,

    /// Shared device key
    #[arg(long, env = "LATCHKEY_DEVICE_KEY", default_value = DEFAULT_DEVICE_KEY, hide_env_values = true)]
    device_key: String,

    /// Seconds to wait between reconnect attempts
    #[arg(long, env = "LATCHKEY_RETRY_BACKOFF_SECS", default_value_t = DEFAULT_RECONNECT_BACKOFF_SECS)]
    retry_backoff_secs: u64,

    /// Give up on a request after this many failed attempts (default: never)
    #[arg(long, env = "LATCHKEY_MAX_CONNECT_ATTEMPTS")]
    max_connect_attempts: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LATCHKEY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_sink = LogBroadcaster::bind(LogSinkConfig::new(SocketAddr::from((
        Ipv4Addr::UNSPECIFIED,
        args.log_port,
    ))))
    .await
    .context("Failed to start log sink")?;

    let sink_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(log_sink.publisher())
        .with_filter(filter_fn(|meta: &Metadata<'_>| {
            !meta.target().starts_with(LOG_SINK_TARGET)
        }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(sink_layer)
        .with(env_filter(&args.log_level))
        .init();

    info!(port = log_sink.local_addr().port(), "Log sink listening");

    let device_id = match args.device_id {
        Some(id) => id,
        None => machine_identity(Path::new(MACHINE_ID_PATH))?,
    };
    info!(device_id = %device_id, server = %args.server, "Latchkey widget starting");

    let mut retry =
        RetryPolicy::default().with_backoff(Duration::from_secs(args.retry_backoff_secs));
    if let Some(max) = args.max_connect_attempts {
        retry = retry.with_max_attempts(max);
    }

    let session = SessionChannel::new(
        TcpClientConfig::new(args.server),
        retry,
        DeviceId::new(device_id),
        DeviceKey::new(args.device_key),
    );
    let mut controller =
        KeypadController::new(ConsoleKeypad::stdin(), session, KeypadConfig::default());

    tokio::select! {
        result = controller.run() => {
            if let Err(e) = &result {
                error!(error = %e, "Keypad stopped");
            }
            result?;
        }
        () = shutdown_signal() => {}
    }

    info!("Widget stopped");
    Ok(())
}
