//! dfc-protocol - Wire protocol for coordinator/device communication
//!
//! This crate provides the message envelope and parsing shared by the
//! coordinator daemon (dfcd) and the device agent (dfc-player), plus the
//! UDP discovery probe/advertisement types.
//!
//! The message vocabulary is closed: every tag the system understands is a
//! constant in [`tags`], and the coordinator's dispatch table is built from
//! exactly those constants. Envelopes with a tag outside the vocabulary
//! still *parse* — rejecting them is a routing decision, not a framing
//! error, so one stray message never costs a device its connection.

pub mod discovery;
pub mod envelope;
pub mod version;

pub use discovery::{DiscoveryAdvertisement, DEFAULT_DISCOVERY_PORT, PROBE_TOKEN};
pub use envelope::{
    tags, CommandPayload, ContentUpdatePayload, Envelope, EnvelopeError, ErrorPayload,
    HeartbeatPayload, RegisterAckPayload, RegisterPayload, RegisterRejectedPayload,
    StatusPayload,
};
pub use version::ProtocolVersion;
