//! Discovery responder: answers "where is the coordinator" probes.
//!
//! A single long-lived task on a UDP socket. Devices broadcast the probe
//! token to the well-known port; the responder replies unicast with a
//! [`DiscoveryAdvertisement`] describing the gateway endpoint. Stateless,
//! best-effort, no shared-state mutation: malformed or unrecognized
//! datagrams are ignored silently.
//!
//! # Address selection
//!
//! Advertised addresses are non-loopback, non-link-local IPv4 addresses,
//! private ranges first. The corpus of candidates is the configured
//! advertise list plus route probes: connecting an unbound UDP socket
//! toward a representative destination in each private range (and one
//! public destination) reveals which local address the kernel would use
//! for that route, without sending a packet.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dfc_protocol::{DiscoveryAdvertisement, PROBE_TOKEN};

use crate::config::CoordinatorConfig;

/// Probe datagrams larger than this cannot be the token; ignored.
const MAX_PROBE_BYTES: usize = 64;

/// Bounded retry for binding the discovery socket at startup.
const BIND_ATTEMPTS: u32 = 3;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What the responder advertises, fixed at startup.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub server_name: String,
    /// TCP port of the gateway (the port devices should connect to).
    pub gateway_port: u16,
    pub endpoint_path: String,
    pub encrypted: bool,
    pub extra_addresses: Vec<Ipv4Addr>,
}

impl ResponderSettings {
    /// Derives settings from the daemon config and the bound gateway port.
    pub fn from_config(config: &CoordinatorConfig, gateway_port: u16) -> Self {
        Self {
            server_name: config.server_name.clone(),
            gateway_port,
            endpoint_path: config.endpoint_path.clone(),
            encrypted: config.encrypted,
            extra_addresses: config.advertise_addresses.clone(),
        }
    }
}

/// UDP responder for coordinator discovery.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    settings: ResponderSettings,
}

impl DiscoveryResponder {
    /// Binds the discovery socket, retrying a bounded number of times
    /// before surfacing a startup failure.
    pub async fn bind(
        addr: SocketAddr,
        settings: ResponderSettings,
    ) -> Result<Self, DiscoveryError> {
        let mut last_error = String::new();

        for attempt in 1..=BIND_ATTEMPTS {
            match UdpSocket::bind(addr).await {
                Ok(socket) => {
                    info!(addr = %addr, attempt, "discovery responder bound");
                    return Ok(Self { socket, settings });
                }
                Err(e) => {
                    warn!(addr = %addr, attempt, error = %e, "discovery bind failed");
                    last_error = e.to_string();
                    if attempt < BIND_ATTEMPTS {
                        tokio::time::sleep(BIND_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(DiscoveryError::Bind {
            addr,
            error: last_error,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        self.socket
            .local_addr()
            .map_err(|e| DiscoveryError::Io(e.to_string()))
    }

    /// Runs the probe/answer loop until cancelled.
    pub async fn run(self, cancel_token: CancellationToken) {
        let mut buf = [0u8; MAX_PROBE_BYTES + 1];

        info!(
            gateway_port = self.settings.gateway_port,
            "discovery responder listening"
        );

        loop {
            let (len, peer) = tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("discovery responder shutting down");
                    return;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        debug!(error = %e, "discovery recv error");
                        continue;
                    }
                },
            };

            if len > MAX_PROBE_BYTES {
                continue;
            }

            let probe = match std::str::from_utf8(&buf[..len]) {
                Ok(text) => text.trim(),
                Err(_) => continue,
            };

            if probe != PROBE_TOKEN {
                debug!(peer = %peer, "ignoring unrecognized probe");
                continue;
            }

            let advert = self.build_advertisement();
            let raw = match serde_json::to_vec(&advert) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "failed to serialize advertisement");
                    continue;
                }
            };

            match self.socket.send_to(&raw, peer).await {
                Ok(_) => debug!(peer = %peer, addresses = advert.addresses.len(), "answered probe"),
                Err(e) => debug!(peer = %peer, error = %e, "failed to answer probe"),
            }
        }
    }

    /// Builds a fresh advertisement for one probe.
    fn build_advertisement(&self) -> DiscoveryAdvertisement {
        let mut candidates = self.settings.extra_addresses.clone();
        candidates.extend(probe_local_ipv4s());

        DiscoveryAdvertisement::new(
            &self.settings.server_name,
            order_for_advertisement(candidates),
            self.settings.gateway_port,
            &self.settings.endpoint_path,
            self.settings.encrypted,
        )
    }
}

// ============================================================================
// Address Selection Policy
// ============================================================================

/// Filters and orders candidate addresses for an advertisement.
///
/// Keeps only advertisable addresses (never loopback, link-local,
/// unspecified, broadcast, or multicast), deduplicates, and orders
/// private-range addresses ahead of public ones. The relative order
/// within each group is preserved.
pub fn order_for_advertisement(candidates: Vec<Ipv4Addr>) -> Vec<String> {
    let mut seen = Vec::new();
    let mut private = Vec::new();
    let mut public = Vec::new();

    for addr in candidates {
        if !is_advertisable(&addr) || seen.contains(&addr) {
            continue;
        }
        seen.push(addr);
        if addr.is_private() {
            private.push(addr.to_string());
        } else {
            public.push(addr.to_string());
        }
    }

    private.extend(public);
    private
}

/// Whether an address is useful to a remote client.
fn is_advertisable(addr: &Ipv4Addr) -> bool {
    !addr.is_loopback()
        && !addr.is_link_local()
        && !addr.is_unspecified()
        && !addr.is_broadcast()
        && !addr.is_multicast()
}

/// Collects local IPv4 addresses by probing routes.
///
/// A connected-but-unbound UDP socket reveals the local address the
/// kernel selects for a destination; probing one destination per private
/// range plus a public one covers multi-homed hosts without needing an
/// interface enumeration API.
pub fn probe_local_ipv4s() -> Vec<Ipv4Addr> {
    const PROBE_DESTINATIONS: [&str; 4] = [
        "10.255.255.1:80",
        "172.31.255.1:80",
        "192.168.255.1:80",
        "8.8.8.8:80",
    ];

    let mut found = Vec::new();
    for dest in PROBE_DESTINATIONS {
        let Ok(socket) = std::net::UdpSocket::bind("0.0.0.0:0") else {
            continue;
        };
        if socket.connect(dest).is_err() {
            continue;
        }
        if let Ok(SocketAddr::V4(local)) = socket.local_addr() {
            found.push(*local.ip());
        }
    }
    found
}

/// Errors that can occur in the discovery responder.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to bind discovery socket at {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("discovery I/O error: {0}")]
    Io(String),
}
