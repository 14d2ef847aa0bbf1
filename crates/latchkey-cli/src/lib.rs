//! Shared plumbing for the `latchkey-server` and `latchkey-widget` binaries.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Where the widget looks for a stable machine identity.
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Log filter: `RUST_LOG` when set, otherwise `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Device ID derived from the machine: the contents of `machine_id_path`
/// when readable and non-empty, otherwise the hostname.
///
/// # Errors
///
/// Returns an error if neither source is available.
pub fn machine_identity(machine_id_path: &Path) -> Result<String> {
    match std::fs::read_to_string(machine_id_path) {
        Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_string()),
        Ok(_) => warn!(path = %machine_id_path.display(), "Machine ID file is empty"),
        Err(e) => warn!(path = %machine_id_path.display(), error = %e, "Machine ID unavailable"),
    }

    let host = hostname::get().context("Failed to read hostname")?;
    let host = host.to_string_lossy().trim().to_string();
    anyhow::ensure!(!host.is_empty(), "Hostname is empty");
    Ok(host)
}

/// Resolves once Ctrl-C is received.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
