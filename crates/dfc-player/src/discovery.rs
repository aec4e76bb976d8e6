//! Discovery client: finds the coordinator before any connection exists.
//!
//! Sends the probe token to the well-known port - as a limited broadcast
//! and, as a secondary path for same-host setups, to loopback - then
//! waits a bounded time for an advertisement. Anything that is not an
//! advertisement is ignored and the wait continues.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use dfc_protocol::{DiscoveryAdvertisement, PROBE_TOKEN};

/// UDP client for coordinator discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    /// Where probes are sent.
    targets: Vec<SocketAddr>,
    /// How long one probe round waits for an answer.
    timeout: Duration,
}

impl DiscoveryClient {
    /// Client probing the standard targets for `port`.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            targets: vec![
                SocketAddr::from((Ipv4Addr::BROADCAST, port)),
                SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            ],
            timeout,
        }
    }

    /// Client probing explicit targets (tests, fixed infrastructure).
    pub fn with_targets(targets: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { targets, timeout }
    }

    /// One probe round: send to every target, wait for the first
    /// advertisement.
    pub async fn probe(&self) -> Result<DiscoveryAdvertisement, DiscoveryError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| DiscoveryError::Socket(e.to_string()))?;

        let mut sent = 0usize;
        for target in &self.targets {
            match socket.send_to(PROBE_TOKEN.as_bytes(), target).await {
                Ok(_) => sent += 1,
                // Broadcast may be unroutable (e.g. no network); the
                // loopback target still covers same-host coordinators.
                Err(e) => debug!(target = %target, error = %e, "probe send failed"),
            }
        }
        if sent == 0 {
            return Err(DiscoveryError::Socket("no probe target reachable".to_string()));
        }

        let mut buf = [0u8; 2048];
        let wait = timeout(self.timeout, async {
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, peer)) => {
                        if let Some(advert) = DiscoveryAdvertisement::parse(&buf[..len]) {
                            debug!(peer = %peer, server = %advert.server, "coordinator answered");
                            return Ok(advert);
                        }
                        debug!(peer = %peer, "ignoring non-advertisement datagram");
                    }
                    Err(e) => return Err(DiscoveryError::Socket(e.to_string())),
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout),
        }
    }

    /// Picks the endpoint URL to dial from an advertisement.
    ///
    /// The coordinator already ordered addresses private-first; the
    /// first one is the best bet.
    pub fn endpoint_from(advert: &DiscoveryAdvertisement) -> Result<String, DiscoveryError> {
        advert
            .endpoint_urls()
            .into_iter()
            .next()
            .ok_or(DiscoveryError::NoAddresses)
    }
}

/// Errors during coordinator discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery socket error: {0}")]
    Socket(String),

    #[error("no coordinator answered within the timeout")]
    Timeout,

    #[error("coordinator advertised no reachable address")]
    NoAddresses,
}
