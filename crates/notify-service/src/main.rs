//! # notify-service
//!
//! Notification service binary: loads settings, starts the hub dispatch loop
//! and the HTTP/WebSocket server, and shuts both down on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use notify_core::logging::{LogFormat, init_subscriber};
use notify_hub::Hub;
use notify_server::NotifyServer;
use notify_server::shutdown::shutdown_signal;
use notify_settings::{NotifySettings, load_settings_from_path, settings_path};
use tracing::{info, warn};

/// WebSocket notification hub.
#[derive(Parser, Debug)]
#[command(name = "notify-service", about = "WebSocket notification hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.notify/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or `EnvFilter` directive (overrides settings; `RUST_LOG` wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings.clone().unwrap_or_else(settings_path)
    }

    fn apply(&self, settings: &mut NotifySettings) {
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

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.settings_path();
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);
    info!(
        settings = %path.display(),
        send_buffer = settings.connection.send_buffer_capacity,
        pong_wait_ms = settings.connection.pong_wait_ms,
        "notify-service starting"
    );

    let (hub, handle) = Hub::new(&settings.hub);
    let server = NotifyServer::new(settings, handle);
    let hub_task = tokio::spawn(hub.run(server.shutdown().token()));
    let (addr, serve_task) = server
        .listen()
        .await
        .context("Failed to bind listener")?;
    info!(%addr, "notify-service ready");

    shutdown_signal().await;
    if !server
        .shutdown()
        .graceful_shutdown(vec![serve_task, hub_task], None)
        .await
    {
        warn!("some tasks were aborted during shutdown");
    }
    info!("notify-service stopped");
    Ok(())
}
