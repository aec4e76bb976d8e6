//! dfc daemon - fleet coordinator for display devices
//!
//! This binary runs as a background daemon, accepting device connections
//! over WebSocket, tracking fleet presence, and answering discovery probes.
//!
//! # Usage
//!
//! ```bash
//! # Start the coordinator (foreground)
//! dfcd start
//!
//! # Start the coordinator (background/daemonized)
//! dfcd start -d
//!
//! # Stop the coordinator
//! dfcd stop
//!
//! # Check coordinator status
//! dfcd status
//!
//! # Start with a custom bind address
//! DFC_BIND=0.0.0.0:9000 dfcd start
//!
//! # Require a registration credential
//! DFC_TOKEN=fleet-secret dfcd start
//!
//! # Enable debug logging
//! RUST_LOG=dfcd=debug dfcd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dfcd::config::CoordinatorConfig;
use dfcd::discovery::{DiscoveryResponder, ResponderSettings};
use dfcd::dispatch::build_dispatcher;
use dfcd::heartbeat::spawn_heartbeat_monitor;
use dfcd::metrics::spawn_metrics_task;
use dfcd::registry::spawn_registry;
use dfcd::server::GatewayServer;

/// dfc daemon - display fleet coordinator
#[derive(Parser, Debug)]
#[command(name = "dfcd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the coordinator
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Gateway bind address (overrides DFC_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Stop the running coordinator
    Stop,
    /// Show coordinator status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("dfc");
    state_dir.join("dfcd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("dfc");
    state_dir.join("dfcd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the coordinator is already running.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file - remove it
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the coordinator process.
fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        bind: None,
    });

    match command {
        Command::Start { daemon, bind } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Coordinator is already running (PID {pid})");
                eprintln!("Use 'dfcd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting the tokio runtime
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(bind);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping coordinator (PID {pid})...");
                stop_daemon(pid)?;

                // Wait for the process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Coordinator stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Coordinator did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Coordinator is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Coordinator is running (PID {pid})");
                Ok(())
            } else {
                println!("Coordinator is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the coordinator (async entry point).
#[tokio::main]
async fn run_daemon(bind_override: Option<SocketAddr>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dfcd=info".parse()?)
                .add_directive("dfc_core=info".parse()?)
                .add_directive("dfc_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "coordinator starting"
    );

    let mut config = CoordinatorConfig::from_env();
    if let Some(bind) = bind_override {
        config.bind_addr = bind;
    }

    let cancel_token = CancellationToken::new();

    // Signal handling
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Fleet state owner
    let registry = spawn_registry();
    info!("device registry started");

    // Liveness monitor
    let _monitor_handle = spawn_heartbeat_monitor(
        registry.clone(),
        config.heartbeat_timeout,
        config.sweep_interval,
        cancel_token.clone(),
    );

    // Self-monitoring
    let _metrics_handle = spawn_metrics_task(cancel_token.clone());

    // Gateway
    let dispatcher = build_dispatcher(registry.clone(), &config);
    let server =
        GatewayServer::bind(&config, registry.clone(), dispatcher, cancel_token.clone()).await?;
    let gateway_addr = server
        .local_addr()
        .map_err(|e| anyhow::anyhow!("gateway address unavailable: {e}"))?;

    // Discovery responder (optional)
    if let Some(port) = config.discovery_port {
        let settings = ResponderSettings::from_config(&config, gateway_addr.port());
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        match DiscoveryResponder::bind(bind_addr, settings).await {
            Ok(responder) => {
                tokio::spawn(responder.run(cancel_token.clone()));
            }
            Err(e) => {
                // Startup failure for the subsystem; the gateway still
                // serves devices with static endpoints.
                error!(error = %e, "discovery responder unavailable");
            }
        }
    } else {
        warn!("discovery disabled by configuration");
    }

    info!(gateway = %gateway_addr, "coordinator ready");

    if let Err(e) = server.run().await {
        error!(error = %e, "gateway error");
        return Err(e.into());
    }

    info!("coordinator stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
