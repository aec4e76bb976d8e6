//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `DeviceEvent`: Events published by the registry for subscribers
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use dfc_core::{ConnectionId, DeviceId, DeviceView, DisconnectReason};
use dfc_protocol::Envelope;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking. The exceptions
/// are the close notifications, which are fire-and-forget because the
/// sending connection task is already unwinding.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Associate a device with a connection, superseding any existing one.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if a new device would exceed capacity
    /// - `RegistryError::DeviceRemoved` if the id was administratively removed
    Register {
        connection_id: ConnectionId,
        device_id: DeviceId,
        display_name: Option<String>,
        remote_addr: Option<String>,
        /// Outbound sink of the connection's writer task.
        sink: mpsc::Sender<Envelope>,
        /// Cancelling this token closes the connection (used on supersede).
        close: CancellationToken,
        respond_to: oneshot::Sender<Result<DeviceView, RegistryError>>,
    },

    /// Record a liveness signal for a registered device.
    ///
    /// # Errors
    /// - `RegistryError::UnknownDevice` if the id was never registered
    Heartbeat {
        device_id: DeviceId,
        state: Option<String>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Forward an inbound application envelope to subscribers.
    ///
    /// # Errors
    /// - `RegistryError::UnknownDevice` if the id was never registered
    RecordStatus {
        device_id: DeviceId,
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Demote a device to Offline, clearing its connection association.
    /// Idempotent: demoting an already-Offline device is a no-op.
    MarkOffline {
        device_id: DeviceId,
        reason: DisconnectReason,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// A transport connection closed. Demotes the associated device only if
    /// this connection is still its active one; a superseded connection
    /// closing late is a no-op. Fire-and-forget.
    ConnectionClosed { connection_id: ConnectionId },

    /// Read-only snapshot of one device.
    Lookup {
        device_id: DeviceId,
        respond_to: oneshot::Sender<Option<DeviceView>>,
    },

    /// Read-only snapshot of all devices.
    ListAll {
        respond_to: oneshot::Sender<Vec<DeviceView>>,
    },

    /// Enqueue an envelope to one device's connection.
    ///
    /// # Errors
    /// - `RegistryError::UnknownDevice` if the id was never registered
    /// - `RegistryError::DeviceNotConnected` if no active connection exists
    /// - `RegistryError::NotSendable` if the connection cannot take writes
    SendToDevice {
        device_id: DeviceId,
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Enqueue an envelope to every connected device. Responds with the
    /// number of devices the envelope was enqueued for.
    Broadcast {
        envelope: Envelope,
        respond_to: oneshot::Sender<usize>,
    },

    /// Record a content assignment and push a CONTENT_UPDATE when connected.
    ///
    /// # Errors
    /// - `RegistryError::UnknownDevice` if the id was never registered
    AssignContent {
        device_id: DeviceId,
        content_ref: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Administrative removal: terminal `Removed` status, connection closed.
    /// The only path to `Removed`; the core never takes it on its own.
    ///
    /// # Errors
    /// - `RegistryError::UnknownDevice` if the id was never registered
    Remove {
        device_id: DeviceId,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum device capacity.
    #[error("registry is full (max: {max} devices)")]
    RegistryFull { max: usize },

    /// The device id was never registered in this process lifetime.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// The device exists but has no active connection.
    #[error("device not connected: {0}")]
    DeviceNotConnected(DeviceId),

    /// The device's connection cannot currently take writes.
    #[error("connection not sendable for device: {0}")]
    NotSendable(DeviceId),

    /// The device was administratively removed and cannot come back.
    #[error("device removed: {0}")]
    DeviceRemoved(DeviceId),

    /// The response channel was closed before receiving a response.
    /// This typically indicates the actor was shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Device Events
// ============================================================================

/// Events published by the registry to external collaborators.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device completed registration and is Online.
    Connected { device_id: DeviceId },

    /// A device lost its connection association.
    Disconnected {
        device_id: DeviceId,
        reason: DisconnectReason,
    },

    /// An inbound application envelope arrived from a device.
    Inbound {
        device_id: DeviceId,
        envelope: Envelope,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::RegistryFull { max: 256 };
        assert_eq!(err.to_string(), "registry is full (max: 256 devices)");

        let err = RegistryError::UnknownDevice(DeviceId::new("dev-1"));
        assert_eq!(err.to_string(), "unknown device: dev-1");

        let err = RegistryError::DeviceNotConnected(DeviceId::new("dev-2"));
        assert_eq!(err.to_string(), "device not connected: dev-2");

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "registry channel closed");
    }

    #[test]
    fn test_device_event_clone() {
        let event = DeviceEvent::Disconnected {
            device_id: DeviceId::new("dev-1"),
            reason: DisconnectReason::HeartbeatTimeout,
        };
        let cloned = event.clone();
        assert!(matches!(cloned, DeviceEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_command_oneshot_pattern() {
        let (tx, rx) = oneshot::channel::<Result<(), RegistryError>>();

        tokio::spawn(async move {
            tx.send(Ok(())).ok();
        });

        let result = rx.await;
        assert!(result.is_ok());
    }
}
