//! dfc player - device-side agent for display fleets
//!
//! Discovers the coordinator on the local network, registers this
//! device, keeps heartbeats flowing, and reconnects on its own after any
//! failure. Runs headless: received commands and content updates are
//! logged where a full player would hand them to its renderer.
//!
//! # Usage
//!
//! ```bash
//! # First run generates and persists a device identity
//! dfc-player
//!
//! # Explicit config file
//! dfc-player --config /etc/dfc/player.toml
//!
//! # Skip discovery with a fixed coordinator endpoint
//! dfc-player --endpoint ws://10.0.0.5:8460/ws
//!
//! # Enable debug logging
//! RUST_LOG=dfc_player=debug dfc-player
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dfc_player::{ConnectionManager, PlayerConfig, PlayerEvent, PlayerSettings};

/// dfc player - display device agent
#[derive(Parser, Debug)]
#[command(name = "dfc-player", version, about)]
struct Args {
    /// Path to the player config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coordinator endpoint, bypassing discovery (e.g. ws://host:8460/ws)
    #[arg(long)]
    endpoint: Option<String>,

    /// Display name override
    #[arg(long)]
    name: Option<String>,

    /// Registration credential override
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dfc_player=info".parse()?)
                .add_directive("dfc_protocol=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(PlayerConfig::default_path);
    let mut config =
        PlayerConfig::load_or_init(&config_path).context("failed to load player config")?;

    if let Some(endpoint) = args.endpoint {
        config.static_endpoint = Some(endpoint);
    }
    if let Some(name) = args.name {
        config.display_name = name;
    }
    if let Some(token) = args.token {
        config.credential = Some(token);
    }

    let settings = PlayerSettings::from_config(&config)
        .map_err(|e| anyhow::anyhow!("invalid player settings: {e}"))?;

    info!(
        device_id = %settings.device_id,
        display_name = %settings.display_name,
        config = %config_path.display(),
        "player starting"
    );

    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let manager = ConnectionManager::new(settings, event_tx, cancel.clone());
    let manager_task = manager.spawn();

    // Ctrl+C ends the player; the manager otherwise retries forever.
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    // The presentation loop of the headless player: render events as log
    // lines. A full player would drive its display from the same channel.
    while let Some(event) = event_rx.recv().await {
        match event {
            PlayerEvent::StateChanged(state) => {
                info!(state = %state, "player state");
            }
            PlayerEvent::Registered {
                device_id,
                heartbeat_interval,
            } => {
                info!(
                    device_id = %device_id,
                    heartbeat_secs = heartbeat_interval.as_secs(),
                    "registered"
                );
            }
            PlayerEvent::Command { name, params } => {
                info!(command = %name, params = %params, "command received");
            }
            PlayerEvent::ContentUpdate { content_ref } => {
                info!(content_ref = %content_ref, "content update received");
            }
            PlayerEvent::CoordinatorError { message, code } => {
                warn!(message = %message, code = ?code, "coordinator reported an error");
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    let _ = manager_task.await;
    info!("player stopped");
    Ok(())
}
