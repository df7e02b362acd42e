//! # relay-daemon
//!
//! `relay` binary: loads settings, starts the WebSocket relay, and shuts it
//! down gracefully on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::config::ServerConfig;
use relay_server::server::RelayServer;
use relay_settings::{RelaySettings, ServerSettings};
use tracing::info;

/// How long to wait for the listener to wind down after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time WebSocket message relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Real-time WebSocket message relay", version)]
struct Cli {
    /// Settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.config {
            Some(path) => relay_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => relay_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        max_connections: settings.max_connections,
        send_queue_capacity: settings.send_queue_capacity,
        heartbeat_interval_secs: settings.heartbeat_interval_secs,
        heartbeat_timeout_secs: settings.heartbeat_timeout_secs,
        max_message_size: settings.max_message_size,
        decode_policy: settings.decode_policy,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    relay_logging::init_from_settings(&settings.logging);

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = RelayServer::new(server_config(&settings.server)).with_metrics(metrics);
    let handle = server.listen().await.context("Failed to bind server")?;

    info!(
        max_connections = settings.server.max_connections,
        decode_policy = %settings.server.decode_policy,
        "relay ready on ws://{}/?id=<identity>",
        handle.addr
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    let closed = server.stop();
    let drained = server
        .shutdown()
        .drain(vec![handle.task], SHUTDOWN_TIMEOUT)
        .await;
    info!(closed, drained, "Shutdown complete");
    Ok(())
}
