//! Discovery probe/advertisement wire types.
//!
//! Before any transport connection exists, a device finds the coordinator
//! by sending a short probe token to a well-known UDP broadcast port. The
//! coordinator answers unicast with an advertisement describing how to
//! reach its gateway. The exchange is unauthenticated by design: it only
//! reveals network-reachable addresses, never credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The probe token a device broadcasts to find the coordinator.
pub const PROBE_TOKEN: &str = "DISCOVER";

/// Well-known UDP port the discovery responder listens on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5555;

/// Wire tag of the advertisement datagram.
pub const ADVERTISEMENT_TAG: &str = "COORDINATOR_ADVERTISEMENT";

/// The coordinator's answer to a discovery probe.
///
/// Constructed fresh per probe, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryAdvertisement {
    /// Always [`ADVERTISEMENT_TAG`].
    #[serde(rename = "type")]
    pub tag: String,

    /// Identity string of the answering coordinator.
    pub server: String,

    /// Reachable IPv4 addresses, private-range addresses first.
    /// Empty when no advertisable address exists (never loopback).
    pub addresses: Vec<String>,

    /// TCP port of the connection gateway.
    pub port: u16,

    /// Transport scheme: `ws` or `wss`.
    pub scheme: String,

    /// Endpoint path of the gateway upgrade handler.
    pub path: String,

    /// Whether the gateway expects an encrypted transport.
    pub encrypted: bool,

    /// When this advertisement was produced.
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryAdvertisement {
    /// Builds an advertisement for the given gateway endpoint.
    pub fn new(
        server: impl Into<String>,
        addresses: Vec<String>,
        port: u16,
        path: impl Into<String>,
        encrypted: bool,
    ) -> Self {
        Self {
            tag: ADVERTISEMENT_TAG.to_string(),
            server: server.into(),
            addresses,
            port,
            scheme: if encrypted { "wss" } else { "ws" }.to_string(),
            path: path.into(),
            encrypted,
            timestamp: Utc::now(),
        }
    }

    /// Parses an advertisement datagram, returning `None` for anything
    /// that is not one (unrecognized datagrams are ignored, not errors).
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let advert: Self = serde_json::from_slice(raw).ok()?;
        if advert.tag != ADVERTISEMENT_TAG {
            return None;
        }
        Some(advert)
    }

    /// Gateway URLs in advertised address order.
    pub fn endpoint_urls(&self) -> Vec<String> {
        self.addresses
            .iter()
            .map(|addr| format!("{}://{}:{}{}", self.scheme, addr, self.port, self.path))
            .collect()
    }
}
