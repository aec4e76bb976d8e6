//! Coordinator configuration.
//!
//! Configuration comes from environment variables (`DFC_*`) with defaults
//! suitable for a single-coordinator LAN deployment. Binary flags override
//! individual fields.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use dfc_protocol::DEFAULT_DISCOVERY_PORT;

/// Default TCP address of the connection gateway.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8460";

/// Default endpoint path for the WebSocket upgrade.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";

/// Default heartbeat cadence expected from devices.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default threshold after which a silent device is demoted.
/// Three missed heartbeats at the default cadence.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default period of the heartbeat monitor scan.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Time a fresh connection gets to send its REGISTER envelope.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for in-flight connection tasks on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Runtime configuration of the coordinator daemon.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// TCP address the gateway binds.
    pub bind_addr: SocketAddr,

    /// Endpoint path advertised for the WebSocket upgrade.
    pub endpoint_path: String,

    /// UDP port of the discovery responder. `None` disables discovery.
    pub discovery_port: Option<u16>,

    /// Identity string placed in discovery advertisements.
    pub server_name: String,

    /// Shared registration credential. `None` means open registration.
    pub auth_token: Option<String>,

    /// Heartbeat cadence handed to devices in REGISTER_ACK.
    pub heartbeat_interval: Duration,

    /// Silence threshold before the monitor demotes a device.
    pub heartbeat_timeout: Duration,

    /// Period of the heartbeat monitor scan.
    pub sweep_interval: Duration,

    /// Time a fresh connection gets to register before being dropped.
    pub registration_timeout: Duration,

    /// Grace period for in-flight work during shutdown.
    pub shutdown_grace: Duration,

    /// Extra addresses to advertise (for multi-homed or NATed hosts).
    pub advertise_addresses: Vec<Ipv4Addr>,

    /// Whether the gateway sits behind an encrypting transport wrapper.
    pub encrypted: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8460))),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            discovery_port: Some(DEFAULT_DISCOVERY_PORT),
            server_name: format!("dfcd/{}", env!("CARGO_PKG_VERSION")),
            auth_token: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            advertise_addresses: Vec::new(),
            encrypted: false,
        }
    }
}

impl CoordinatorConfig {
    /// Builds a configuration from `DFC_*` environment variables, starting
    /// from defaults. Unparseable values fall back to the default and are
    /// logged rather than failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("DFC_BIND") {
            match raw.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid DFC_BIND"),
            }
        }

        if let Ok(raw) = std::env::var("DFC_DISCOVERY_PORT") {
            if raw == "off" {
                config.discovery_port = None;
            } else {
                match raw.parse() {
                    Ok(port) => config.discovery_port = Some(port),
                    Err(_) => tracing::warn!(value = %raw, "ignoring invalid DFC_DISCOVERY_PORT"),
                }
            }
        }

        if let Ok(token) = std::env::var("DFC_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Some(secs) = env_secs("DFC_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("DFC_HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("DFC_SWEEP_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }

        if let Ok(raw) = std::env::var("DFC_ADVERTISE") {
            config.advertise_addresses = raw
                .split(',')
                .filter_map(|part| {
                    let trimmed = part.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    match trimmed.parse() {
                        Ok(addr) => Some(addr),
                        Err(_) => {
                            tracing::warn!(value = %trimmed, "ignoring invalid DFC_ADVERTISE entry");
                            None
                        }
                    }
                })
                .collect();
        }

        if let Ok(raw) = std::env::var("DFC_ENCRYPTED") {
            config.encrypted = raw == "1" || raw.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Heartbeat interval in whole seconds, as sent in REGISTER_ACK.
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval.as_secs().max(1)
    }
}

fn env_secs(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid duration");
            None
        }
    }
}
