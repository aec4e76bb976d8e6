//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor and subscribing to device events. This
//! is the surface external collaborators see: they never touch the map
//! itself, only the operations defined here.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use dfc_core::{ConnectionId, DeviceId, DeviceView, DisconnectReason};
use dfc_protocol::Envelope;

use super::commands::{DeviceEvent, RegistryCommand, RegistryError};

/// Handle for interacting with the registry actor.
///
/// Cheap to clone and safe to share across tasks. All methods are async
/// and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<DeviceEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Associates a device with a connection, superseding any existing one.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if a new device would exceed capacity
    /// - `RegistryError::DeviceRemoved` if the id was administratively removed
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        device_id: DeviceId,
        display_name: Option<String>,
        remote_addr: Option<String>,
        sink: mpsc::Sender<Envelope>,
        close: CancellationToken,
    ) -> Result<DeviceView, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                connection_id,
                device_id,
                display_name,
                remote_addr,
                sink,
                close,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Records a liveness signal for a registered device.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownDevice` if the id was never registered
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn heartbeat(
        &self,
        device_id: DeviceId,
        state: Option<String>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Heartbeat {
                device_id,
                state,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Forwards an inbound application envelope to subscribers.
    pub async fn record_status(
        &self,
        device_id: DeviceId,
        envelope: Envelope,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::RecordStatus {
                device_id,
                envelope,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Demotes a device to Offline. Idempotent.
    pub async fn mark_offline(
        &self,
        device_id: DeviceId,
        reason: DisconnectReason,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::MarkOffline {
                device_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Notifies the registry that a transport connection closed.
    ///
    /// Fire-and-forget: the sending task is already unwinding, so send
    /// errors are ignored (the actor is shutting down too).
    pub async fn connection_closed(&self, connection_id: ConnectionId) {
        let _ = self
            .sender
            .send(RegistryCommand::ConnectionClosed { connection_id })
            .await;
    }

    /// Gets a single device snapshot.
    ///
    /// Returns `None` if the device doesn't exist or if communication
    /// with the actor fails.
    pub async fn lookup(&self, device_id: DeviceId) -> Option<DeviceView> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Lookup {
                device_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Gets snapshots of all devices.
    ///
    /// Returns an empty vector if no devices are registered or if
    /// communication with the actor fails.
    pub async fn list_all(&self) -> Vec<DeviceView> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListAll { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Enqueues an envelope to one device.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownDevice` if the id was never registered
    /// - `RegistryError::DeviceNotConnected` if no active connection exists
    /// - `RegistryError::NotSendable` if the connection cannot take writes
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn send_to_device(
        &self,
        device_id: DeviceId,
        envelope: Envelope,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SendToDevice {
                device_id,
                envelope,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Enqueues an envelope to every connected device; returns how many
    /// devices it was enqueued for.
    pub async fn broadcast_to_all(&self, envelope: Envelope) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Broadcast {
                envelope,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Records a content assignment and pushes it when the device is up.
    pub async fn assign_content(
        &self,
        device_id: DeviceId,
        content_ref: String,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::AssignContent {
                device_id,
                content_ref,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Administratively removes a device (terminal).
    pub async fn remove(&self, device_id: DeviceId) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Remove {
                device_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Subscribes to device events.
    ///
    /// Returns a broadcast receiver for all connect/disconnect/inbound
    /// events published by the registry actor. Synchronous - does not
    /// communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_sender.subscribe()
    }

    /// Checks if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_heartbeat_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Heartbeat {
                device_id,
                state,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(device_id.as_str(), "dev-1");
                assert_eq!(state.as_deref(), Some("playing"));
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        let result = handle
            .heartbeat(DeviceId::new("dev-1"), Some("playing".to_string()))
            .await;
        assert!(result.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.heartbeat(DeviceId::new("dev-1"), None).await;
        assert!(matches!(result, Err(RegistryError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_lookup_returns_none_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.lookup(DeviceId::new("dev-1")).await.is_none());
    }

    #[tokio::test]
    async fn test_list_all_returns_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_returns_zero_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let count = handle
            .broadcast_to_all(Envelope::content_update("playlist-1"))
            .await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_connection_closed_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle.connection_closed(ConnectionId::new(1)).await;
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let _subscriber = handle.subscribe();
    }

    #[tokio::test]
    async fn test_send_to_device_command_roundtrip() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::SendToDevice {
                device_id,
                envelope,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(device_id.as_str(), "dev-1");
                assert_eq!(envelope.tag, dfc_protocol::tags::COMMAND);
                let _ = respond_to.send(Err(RegistryError::DeviceNotConnected(device_id)));
                return true;
            }
            false
        });

        let result = handle
            .send_to_device(
                DeviceId::new("dev-1"),
                Envelope::command("reboot", serde_json::json!({})),
            )
            .await;
        assert!(matches!(result, Err(RegistryError::DeviceNotConnected(_))));
        assert!(cmd_handler.await.unwrap());
    }
}
