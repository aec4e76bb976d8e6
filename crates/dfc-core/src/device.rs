//! Device domain entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable logical identity of one physical display.
///
/// Assigned by the device on first registration (the player persists it in
/// its config file) and reused across reconnects, so the coordinator can
/// associate a new transport connection with the same fleet member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a new DeviceId from a string.
    ///
    /// Note: This does not validate the format. The device provides the id,
    /// so we trust its shape and only require stability.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ephemeral, process-local identifier for one live transport session.
///
/// A new id is minted for every accepted connection; it is never reused
/// within a process lifetime, which lets the registry tell "this device's
/// current connection" apart from a superseded one that closes late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Device Status
// ============================================================================

/// Lifecycle status of a device.
///
/// Valid transitions: `Unknown → Registering → Online ⇄ Offline → Removed`.
/// `Registering` is transient (covers the registration handshake),
/// Online/Offline cycle freely on reconnect, and `Removed` is terminal —
/// reachable only through an explicit administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Never completed a registration in this process lifetime.
    Unknown,
    /// Registration handshake in progress.
    Registering,
    /// Registered with a live connection and recent heartbeats.
    Online,
    /// Previously registered, connection gone or heartbeats stopped.
    Offline,
    /// Administratively removed. Terminal.
    Removed,
}

impl DeviceStatus {
    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Self-transitions are allowed (they are no-ops for callers that
    /// re-apply a status idempotently).
    #[must_use]
    pub fn can_transition(&self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        if *self == next {
            return true;
        }
        match (*self, next) {
            (Unknown, Registering) => true,
            (Registering, Online) => true,
            (Registering, Offline) => true,
            (Online, Offline) => true,
            (Offline, Online) => true,
            // Re-registration of an online device (supersede) passes through
            // Registering again.
            (Online, Registering) => true,
            (Offline, Registering) => true,
            (Online, Removed) => true,
            (Offline, Removed) => true,
            (Unknown, Removed) => true,
            (Registering, Removed) => true,
            _ => false,
        }
    }

    /// True for states in which the device may receive outbound envelopes.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }

    /// True once the device can never come back.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceStatus::Removed)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Registering => "registering",
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Removed => "removed",
        };
        write!(f, "{label}")
    }
}

// ============================================================================
// Disconnect Reason
// ============================================================================

/// Why a device's connection association was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The transport closed (peer close, read/write error).
    ConnectionClosed,
    /// A newer registration for the same device id took over.
    Superseded,
    /// The heartbeat monitor timed the device out.
    HeartbeatTimeout,
    /// The coordinator is shutting down.
    Shutdown,
    /// An external collaborator removed the device.
    Removed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Superseded => write!(f, "superseded by a newer registration"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Shutdown => write!(f, "coordinator shutdown"),
            Self::Removed => write!(f, "administratively removed"),
        }
    }
}

// ============================================================================
// Device
// ============================================================================

/// Domain record for one display device.
///
/// Created on first registration and mutated by the registry (status,
/// heartbeats) and the heartbeat monitor (status → Offline). The record
/// outlives connections: it stays in the registry while the device is
/// Offline so metadata survives reconnects.
#[derive(Debug, Clone)]
pub struct Device {
    /// Stable logical identity.
    pub id: DeviceId,

    /// Human-readable name reported at registration.
    pub display_name: String,

    /// Last remote address the device connected from.
    pub last_known_address: Option<String>,

    /// Current lifecycle status.
    pub status: DeviceStatus,

    /// When the device first registered in this process lifetime.
    pub first_seen: DateTime<Utc>,

    /// Wall-clock time of the last heartbeat (for display; timeout math
    /// uses the registry's monotonic clock).
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Opaque content reference assigned by an external collaborator.
    pub assigned_content_ref: Option<String>,

    /// How many times this device has (re)registered.
    pub registration_count: u32,
}

impl Device {
    /// Creates a new device record in `Registering` state.
    pub fn new(id: DeviceId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            last_known_address: None,
            status: DeviceStatus::Registering,
            first_seen: Utc::now(),
            last_heartbeat: None,
            assigned_content_ref: None,
            registration_count: 0,
        }
    }

    /// Applies a status transition, rejecting invalid jumps.
    pub fn transition(&mut self, next: DeviceStatus) -> Result<(), crate::DomainError> {
        if !self.status.can_transition(next) {
            return Err(crate::DomainError::InvalidTransition {
                device_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        if self.status != next {
            tracing::debug!(
                device_id = %self.id,
                from = %self.status,
                to = %next,
                "device status transition"
            );
        }
        self.status = next;
        Ok(())
    }
}

// ============================================================================
// Device View
// ============================================================================

/// Read-only snapshot of a device handed to external collaborators.
///
/// Decoupled from the domain struct so registry internals can change
/// without breaking consumers, and serializable for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    pub id: DeviceId,
    pub display_name: String,
    pub status: DeviceStatus,
    pub last_known_address: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Seconds since the last heartbeat, measured on the registry's
    /// monotonic clock. `None` when no heartbeat has arrived yet.
    pub heartbeat_age_secs: Option<u64>,
    pub assigned_content_ref: Option<String>,
    pub registration_count: u32,
    /// Whether an active connection is currently associated.
    pub connected: bool,
}

impl DeviceView {
    /// Builds a view from a domain record plus connection-level facts the
    /// registry knows.
    pub fn from_device(device: &Device, connected: bool, heartbeat_age_secs: Option<u64>) -> Self {
        Self {
            id: device.id.clone(),
            display_name: device.display_name.clone(),
            status: device.status,
            last_known_address: device.last_known_address.clone(),
            first_seen: device.first_seen,
            last_heartbeat: device.last_heartbeat,
            heartbeat_age_secs,
            assigned_content_ref: device.assigned_content_ref.clone(),
            registration_count: device.registration_count,
            connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_short() {
        let id = DeviceId::new("lobby-north-4k-0001");
        assert_eq!(id.short(), "lobby-no");

        let tiny = DeviceId::new("d1");
        assert_eq!(tiny.short(), "d1");
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(17);
        assert_eq!(id.to_string(), "conn-17");
        assert_eq!(id.value(), 17);
    }

    #[test]
    fn test_status_happy_path_transitions() {
        use DeviceStatus::*;
        assert!(Unknown.can_transition(Registering));
        assert!(Registering.can_transition(Online));
        assert!(Online.can_transition(Offline));
        assert!(Offline.can_transition(Online));
        assert!(Offline.can_transition(Removed));
    }

    #[test]
    fn test_status_invalid_transitions() {
        use DeviceStatus::*;
        // Online is only reachable through registration.
        assert!(!Unknown.can_transition(Online));
        assert!(!Unknown.can_transition(Offline));
        // Removed is terminal.
        assert!(!Removed.can_transition(Online));
        assert!(!Removed.can_transition(Offline));
        assert!(!Removed.can_transition(Registering));
    }

    #[test]
    fn test_status_self_transition_is_allowed() {
        use DeviceStatus::*;
        assert!(Offline.can_transition(Offline));
        assert!(Online.can_transition(Online));
    }

    #[test]
    fn test_device_transition_rejects_invalid() {
        let mut device = Device::new(DeviceId::new("dev-1"), "Lobby");
        assert_eq!(device.status, DeviceStatus::Registering);

        device.transition(DeviceStatus::Online).expect("register");
        device.transition(DeviceStatus::Offline).expect("demote");
        device
            .transition(DeviceStatus::Removed)
            .expect("administrative removal");

        let err = device.transition(DeviceStatus::Online);
        assert!(err.is_err(), "removed must be terminal");
    }

    #[test]
    fn test_view_reflects_connection_state() {
        let mut device = Device::new(DeviceId::new("dev-2"), "Foyer");
        device.transition(DeviceStatus::Online).expect("online");

        let view = DeviceView::from_device(&device, true, Some(3));
        assert_eq!(view.status, DeviceStatus::Online);
        assert!(view.connected);
        assert_eq!(view.heartbeat_age_secs, Some(3));
    }

    #[test]
    fn test_status_serde_shape() {
        let json = serde_json::to_string(&DeviceStatus::Online).expect("serialize");
        assert_eq!(json, "\"online\"");
        let parsed: DeviceStatus = serde_json::from_str("\"offline\"").expect("parse");
        assert_eq!(parsed, DeviceStatus::Offline);
    }
}
