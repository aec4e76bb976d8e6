//! Registry actor - owns all device state and processes commands.
//!
//! The RegistryActor is the single owner of fleet state in the system.
//! It receives commands via an mpsc channel and publishes events via
//! broadcast. Commands are processed sequentially on one task, which is
//! what gives every mutation the exclusive critical section the design
//! requires: "is this device currently mapped to this connection" can
//! never be observed in a torn state.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dfc_core::{ConnectionId, Device, DeviceId, DeviceStatus, DeviceView, DisconnectReason};
use dfc_protocol::Envelope;

use super::commands::{DeviceEvent, RegistryCommand, RegistryError};

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of devices the registry can hold.
pub const MAX_DEVICES: usize = 256;

// ============================================================================
// Records
// ============================================================================

/// The currently-active transport connection of a device.
#[derive(Debug)]
struct ActiveConnection {
    id: ConnectionId,
    /// Outbound sink drained by the connection's writer task.
    sink: mpsc::Sender<Envelope>,
    /// Cancelling this closes the connection.
    close: CancellationToken,
}

/// One device's registry entry: domain record plus connection bookkeeping.
#[derive(Debug)]
struct DeviceRecord {
    device: Device,
    connection: Option<ActiveConnection>,
    /// Monotonic timestamp of the last heartbeat; timeout math never uses
    /// the wall clock.
    last_heartbeat_mono: Option<Instant>,
}

impl DeviceRecord {
    fn view(&self) -> DeviceView {
        let age = self.last_heartbeat_mono.map(|at| at.elapsed().as_secs());
        DeviceView::from_device(&self.device, self.connection.is_some(), age)
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all device state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to subscribers.
///
/// # Ownership
///
/// The actor owns:
/// - `devices`: HashMap of device records keyed by `DeviceId`
/// - `connection_index`: index for `ConnectionId` → `DeviceId` lookups,
///   maintained so a closing connection can be matched against the
///   device's *current* association (a superseded connection that closes
///   late must not demote the device).
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    devices: HashMap<DeviceId, DeviceRecord>,
    connection_index: HashMap<ConnectionId, DeviceId>,
    event_publisher: broadcast::Sender<DeviceEvent>,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            receiver,
            devices: HashMap::new(),
            connection_index: HashMap::new(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("device registry starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(devices = self.devices.len(), "device registry stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                connection_id,
                device_id,
                display_name,
                remote_addr,
                sink,
                close,
                respond_to,
            } => {
                let result = self.handle_register(
                    connection_id,
                    device_id,
                    display_name,
                    remote_addr,
                    sink,
                    close,
                );
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Heartbeat {
                device_id,
                state,
                respond_to,
            } => {
                let result = self.handle_heartbeat(&device_id, state);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RecordStatus {
                device_id,
                envelope,
                respond_to,
            } => {
                let result = self.handle_record_status(&device_id, envelope);
                let _ = respond_to.send(result);
            }
            RegistryCommand::MarkOffline {
                device_id,
                reason,
                respond_to,
            } => {
                let result = self.handle_mark_offline(&device_id, reason);
                let _ = respond_to.send(result);
            }
            RegistryCommand::ConnectionClosed { connection_id } => {
                self.handle_connection_closed(connection_id);
            }
            RegistryCommand::Lookup {
                device_id,
                respond_to,
            } => {
                let result = self.devices.get(&device_id).map(DeviceRecord::view);
                let _ = respond_to.send(result);
            }
            RegistryCommand::ListAll { respond_to } => {
                let views = self.devices.values().map(DeviceRecord::view).collect();
                let _ = respond_to.send(views);
            }
            RegistryCommand::SendToDevice {
                device_id,
                envelope,
                respond_to,
            } => {
                let result = self.handle_send(&device_id, envelope);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Broadcast {
                envelope,
                respond_to,
            } => {
                let count = self.handle_broadcast(envelope);
                let _ = respond_to.send(count);
            }
            RegistryCommand::AssignContent {
                device_id,
                content_ref,
                respond_to,
            } => {
                let result = self.handle_assign_content(&device_id, content_ref);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove {
                device_id,
                respond_to,
            } => {
                let result = self.handle_remove(&device_id);
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles device registration.
    ///
    /// Last registration wins: if the device already has a live connection,
    /// the old one is closed and unindexed before the new association is
    /// installed, so at most one connection maps to a device at any instant.
    fn handle_register(
        &mut self,
        connection_id: ConnectionId,
        device_id: DeviceId,
        display_name: Option<String>,
        remote_addr: Option<String>,
        sink: mpsc::Sender<Envelope>,
        close: CancellationToken,
    ) -> Result<DeviceView, RegistryError> {
        if let Some(record) = self.devices.get(&device_id) {
            if record.device.status == DeviceStatus::Removed {
                warn!(device_id = %device_id, "rejecting registration of removed device");
                return Err(RegistryError::DeviceRemoved(device_id));
            }
        } else if self.devices.len() >= MAX_DEVICES {
            warn!(
                device_id = %device_id,
                current = self.devices.len(),
                max = MAX_DEVICES,
                "registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull { max: MAX_DEVICES });
        }

        let record = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| DeviceRecord {
                device: Device::new(
                    device_id.clone(),
                    display_name.clone().unwrap_or_else(|| device_id.to_string()),
                ),
                connection: None,
                last_heartbeat_mono: None,
            });

        // Supersede: close and unindex the previous connection first.
        if let Some(old) = record.connection.take() {
            info!(
                device_id = %device_id,
                old_connection = %old.id,
                new_connection = %connection_id,
                "superseding existing connection"
            );
            old.close.cancel();
            self.connection_index.remove(&old.id);
            let _ = self.event_publisher.send(DeviceEvent::Disconnected {
                device_id: device_id.clone(),
                reason: DisconnectReason::Superseded,
            });
        }

        if let Err(e) = record.device.transition(DeviceStatus::Registering) {
            debug!(error = %e, "transition to registering");
        }
        if let Some(name) = display_name {
            record.device.display_name = name;
        }
        record.device.last_known_address = remote_addr;
        record.device.registration_count = record.device.registration_count.saturating_add(1);

        if let Err(e) = record.device.transition(DeviceStatus::Online) {
            debug!(error = %e, "transition to online");
        }
        // Registration counts as liveness so the monitor has a baseline.
        record.last_heartbeat_mono = Some(Instant::now());
        record.device.last_heartbeat = Some(Utc::now());

        record.connection = Some(ActiveConnection {
            id: connection_id,
            sink,
            close,
        });
        let registrations = record.device.registration_count;
        let view = record.view();

        self.connection_index.insert(connection_id, device_id.clone());

        info!(
            device_id = %device_id,
            connection_id = %connection_id,
            registrations,
            total_devices = self.devices.len(),
            "device registered"
        );

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(DeviceEvent::Connected {
            device_id: device_id.clone(),
        });

        Ok(view)
    }

    /// Handles a heartbeat. Updates the liveness timestamps; the status is
    /// untouched (an Offline device cannot heartbeat itself back Online —
    /// registration is the only way in).
    fn handle_heartbeat(
        &mut self,
        device_id: &DeviceId,
        state: Option<String>,
    ) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.clone()))?;

        if record.device.status == DeviceStatus::Removed {
            return Err(RegistryError::DeviceRemoved(device_id.clone()));
        }

        record.last_heartbeat_mono = Some(Instant::now());
        record.device.last_heartbeat = Some(Utc::now());

        debug!(
            device_id = %device_id,
            status = %record.device.status,
            state = ?state,
            "heartbeat recorded"
        );

        Ok(())
    }

    /// Forwards an inbound application envelope to subscribers.
    fn handle_record_status(
        &mut self,
        device_id: &DeviceId,
        envelope: Envelope,
    ) -> Result<(), RegistryError> {
        if !self.devices.contains_key(device_id) {
            return Err(RegistryError::UnknownDevice(device_id.clone()));
        }

        let _ = self.event_publisher.send(DeviceEvent::Inbound {
            device_id: device_id.clone(),
            envelope,
        });

        Ok(())
    }

    /// Handles the idempotent Offline transition.
    ///
    /// Exactly one `Disconnected` event fires per Online→Offline cycle; a
    /// second demotion attempt on an already-Offline device is a no-op.
    fn handle_mark_offline(
        &mut self,
        device_id: &DeviceId,
        reason: DisconnectReason,
    ) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.clone()))?;

        match record.device.status {
            DeviceStatus::Offline | DeviceStatus::Removed => {
                debug!(device_id = %device_id, "mark offline: already down, no-op");
                return Ok(());
            }
            _ => {}
        }

        if let Some(conn) = record.connection.take() {
            conn.close.cancel();
            self.connection_index.remove(&conn.id);
        }

        if let Err(e) = record.device.transition(DeviceStatus::Offline) {
            debug!(error = %e, "transition to offline");
        }

        info!(device_id = %device_id, reason = %reason, "device offline");

        let _ = self.event_publisher.send(DeviceEvent::Disconnected {
            device_id: device_id.clone(),
            reason,
        });

        Ok(())
    }

    /// Handles a transport close notification from a connection task.
    ///
    /// Only demotes the device if the closing connection is still its
    /// active one; a superseded connection closing late finds itself
    /// unindexed and the notification is a no-op.
    fn handle_connection_closed(&mut self, connection_id: ConnectionId) {
        let Some(device_id) = self.connection_index.get(&connection_id).cloned() else {
            debug!(connection_id = %connection_id, "close for unassociated connection");
            return;
        };

        let still_active = self
            .devices
            .get(&device_id)
            .and_then(|r| r.connection.as_ref())
            .map(|c| c.id == connection_id)
            .unwrap_or(false);

        if !still_active {
            self.connection_index.remove(&connection_id);
            return;
        }

        let _ = self.handle_mark_offline(&device_id, DisconnectReason::ConnectionClosed);
    }

    /// Enqueues an envelope on a device's active connection.
    ///
    /// Enqueue success does not imply delivery; it only means the writer
    /// task has accepted the frame.
    fn handle_send(
        &mut self,
        device_id: &DeviceId,
        envelope: Envelope,
    ) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.clone()))?;

        let conn = record
            .connection
            .as_ref()
            .ok_or_else(|| RegistryError::DeviceNotConnected(device_id.clone()))?;

        match conn.sink.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(device_id = %device_id, "outbound queue full");
                Err(RegistryError::NotSendable(device_id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Writer task is gone; the close notification will follow,
                // but demote now so callers see a consistent answer.
                let _ = self.handle_mark_offline(device_id, DisconnectReason::ConnectionClosed);
                Err(RegistryError::NotSendable(device_id.clone()))
            }
        }
    }

    /// Enqueues an envelope for every connected device.
    fn handle_broadcast(&mut self, envelope: Envelope) -> usize {
        let mut delivered = 0;
        for record in self.devices.values() {
            if let Some(conn) = &record.connection {
                if conn.sink.try_send(envelope.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(delivered, "broadcast enqueued");
        delivered
    }

    /// Records a content assignment and pushes it when the device is up.
    fn handle_assign_content(
        &mut self,
        device_id: &DeviceId,
        content_ref: String,
    ) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.clone()))?;

        record.device.assigned_content_ref = Some(content_ref.clone());

        if let Some(conn) = &record.connection {
            if conn
                .sink
                .try_send(Envelope::content_update(content_ref))
                .is_err()
            {
                debug!(device_id = %device_id, "content update not enqueued");
            }
        }

        Ok(())
    }

    /// Administrative removal. Terminal: the record stays with status
    /// `Removed` so the id cannot silently re-register.
    fn handle_remove(&mut self, device_id: &DeviceId) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.clone()))?;

        if record.device.status == DeviceStatus::Removed {
            return Ok(());
        }

        let had_connection = record.connection.is_some();
        if let Some(conn) = record.connection.take() {
            conn.close.cancel();
            self.connection_index.remove(&conn.id);
        }

        if let Err(e) = record.device.transition(DeviceStatus::Removed) {
            debug!(error = %e, "transition to removed");
        }

        info!(device_id = %device_id, "device removed");

        if had_connection {
            let _ = self.event_publisher.send(DeviceEvent::Disconnected {
                device_id: device_id.clone(),
                reason: DisconnectReason::Removed,
            });
        }

        Ok(())
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of devices currently registered.
    #[cfg(test)]
    fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn create_actor() -> (RegistryActor, broadcast::Receiver<DeviceEvent>) {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        let actor = RegistryActor::new(cmd_rx, event_tx);
        (actor, event_rx)
    }

    fn register(
        actor: &mut RegistryActor,
        conn: u64,
        device: &str,
    ) -> (
        Result<DeviceView, RegistryError>,
        mpsc::Receiver<Envelope>,
        CancellationToken,
    ) {
        let (sink, outbound_rx) = mpsc::channel(8);
        let close = CancellationToken::new();
        let result = actor.handle_register(
            ConnectionId::new(conn),
            DeviceId::new(device),
            Some(format!("{device} display")),
            Some("192.168.1.50:40000".to_string()),
            sink,
            close.clone(),
        );
        (result, outbound_rx, close)
    }

    #[tokio::test]
    async fn test_register_creates_online_device() {
        let (mut actor, mut event_rx) = create_actor();

        let (result, _rx, _close) = register(&mut actor, 1, "dev-1");
        let view = result.expect("registration succeeds");

        assert_eq!(view.status, DeviceStatus::Online);
        assert!(view.connected);
        assert_eq!(view.registration_count, 1);
        assert_eq!(actor.device_count(), 1);

        let event = event_rx.try_recv().expect("connected event");
        assert!(matches!(event, DeviceEvent::Connected { .. }));
    }

    #[tokio::test]
    async fn test_register_supersedes_old_connection() {
        let (mut actor, mut event_rx) = create_actor();

        let (first, _rx1, close1) = register(&mut actor, 1, "dev-1");
        first.expect("first registration");
        let _ = event_rx.try_recv();

        let (second, _rx2, close2) = register(&mut actor, 2, "dev-1");
        let view = second.expect("second registration");

        // Old connection closed, new one active, still one device.
        assert!(close1.is_cancelled());
        assert!(!close2.is_cancelled());
        assert_eq!(actor.device_count(), 1);
        assert_eq!(view.registration_count, 2);

        let disconnected = event_rx.try_recv().expect("superseded event");
        assert!(matches!(
            disconnected,
            DeviceEvent::Disconnected {
                reason: DisconnectReason::Superseded,
                ..
            }
        ));
        let connected = event_rx.try_recv().expect("connected event");
        assert!(matches!(connected, DeviceEvent::Connected { .. }));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_device() {
        let (mut actor, _events) = create_actor();

        let result = actor.handle_heartbeat(&DeviceId::new("ghost"), None);
        assert!(matches!(result, Err(RegistryError::UnknownDevice(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_updates_timestamp() {
        let (mut actor, _events) = create_actor();
        let (result, _rx, _close) = register(&mut actor, 1, "dev-1");
        result.expect("register");

        actor
            .handle_heartbeat(&DeviceId::new("dev-1"), Some("playing".to_string()))
            .expect("heartbeat");

        let record = actor.devices.get(&DeviceId::new("dev-1")).expect("record");
        assert!(record.device.last_heartbeat.is_some());
        assert_eq!(record.device.status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn test_mark_offline_is_idempotent() {
        let (mut actor, mut event_rx) = create_actor();
        let (result, _rx, close) = register(&mut actor, 1, "dev-1");
        result.expect("register");
        let _ = event_rx.try_recv();

        let id = DeviceId::new("dev-1");
        actor
            .handle_mark_offline(&id, DisconnectReason::HeartbeatTimeout)
            .expect("first demotion");
        assert!(close.is_cancelled());

        // Second demotion: no error, no second event.
        actor
            .handle_mark_offline(&id, DisconnectReason::HeartbeatTimeout)
            .expect("second demotion is a no-op");

        let event = event_rx.try_recv().expect("one disconnected event");
        assert!(matches!(
            event,
            DeviceEvent::Disconnected {
                reason: DisconnectReason::HeartbeatTimeout,
                ..
            }
        ));
        assert!(event_rx.try_recv().is_err(), "no duplicate event");
    }

    #[tokio::test]
    async fn test_connection_closed_demotes_active() {
        let (mut actor, _events) = create_actor();
        let (result, _rx, _close) = register(&mut actor, 7, "dev-1");
        result.expect("register");

        actor.handle_connection_closed(ConnectionId::new(7));

        let record = actor.devices.get(&DeviceId::new("dev-1")).expect("record");
        assert_eq!(record.device.status, DeviceStatus::Offline);
        assert!(record.connection.is_none());
    }

    #[tokio::test]
    async fn test_superseded_close_does_not_demote() {
        let (mut actor, _events) = create_actor();
        let (first, _rx1, _c1) = register(&mut actor, 1, "dev-1");
        first.expect("first");
        let (second, _rx2, _c2) = register(&mut actor, 2, "dev-1");
        second.expect("second");

        // The superseded connection closes late.
        actor.handle_connection_closed(ConnectionId::new(1));

        let record = actor.devices.get(&DeviceId::new("dev-1")).expect("record");
        assert_eq!(record.device.status, DeviceStatus::Online);
        assert!(record.connection.is_some());
    }

    #[tokio::test]
    async fn test_send_to_disconnected_device() {
        let (mut actor, _events) = create_actor();
        let (result, _rx, _close) = register(&mut actor, 1, "dev-1");
        result.expect("register");

        let id = DeviceId::new("dev-1");
        actor
            .handle_mark_offline(&id, DisconnectReason::ConnectionClosed)
            .expect("demote");

        let result = actor.handle_send(&id, Envelope::command("reboot", serde_json::json!({})));
        assert!(matches!(result, Err(RegistryError::DeviceNotConnected(_))));
    }

    #[tokio::test]
    async fn test_send_enqueues_on_sink() {
        let (mut actor, _events) = create_actor();
        let (result, mut outbound_rx, _close) = register(&mut actor, 1, "dev-1");
        result.expect("register");

        actor
            .handle_send(
                &DeviceId::new("dev-1"),
                Envelope::command("reload", serde_json::json!({})),
            )
            .expect("send");

        let envelope = outbound_rx.try_recv().expect("enqueued envelope");
        assert_eq!(envelope.tag, dfc_protocol::tags::COMMAND);
    }

    #[tokio::test]
    async fn test_broadcast_counts_connected_only() {
        let (mut actor, _events) = create_actor();
        let (r1, _rx1, _c1) = register(&mut actor, 1, "dev-1");
        r1.expect("register dev-1");
        let (r2, _rx2, _c2) = register(&mut actor, 2, "dev-2");
        r2.expect("register dev-2");

        actor
            .handle_mark_offline(&DeviceId::new("dev-2"), DisconnectReason::ConnectionClosed)
            .expect("demote dev-2");

        let count = actor.handle_broadcast(Envelope::content_update("playlist-7"));
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_assign_content_records_and_pushes() {
        let (mut actor, _events) = create_actor();
        let (result, mut outbound_rx, _close) = register(&mut actor, 1, "dev-1");
        result.expect("register");

        actor
            .handle_assign_content(&DeviceId::new("dev-1"), "playlist-9".to_string())
            .expect("assign");

        let record = actor.devices.get(&DeviceId::new("dev-1")).expect("record");
        assert_eq!(
            record.device.assigned_content_ref.as_deref(),
            Some("playlist-9")
        );

        let envelope = outbound_rx.try_recv().expect("pushed update");
        assert_eq!(envelope.tag, dfc_protocol::tags::CONTENT_UPDATE);
        assert_eq!(envelope.payload_str("content_ref"), Some("playlist-9"));
    }

    #[tokio::test]
    async fn test_remove_is_terminal() {
        let (mut actor, _events) = create_actor();
        let (result, _rx, close) = register(&mut actor, 1, "dev-1");
        result.expect("register");

        let id = DeviceId::new("dev-1");
        actor.handle_remove(&id).expect("remove");
        assert!(close.is_cancelled());

        let record = actor.devices.get(&id).expect("record kept");
        assert_eq!(record.device.status, DeviceStatus::Removed);

        // Re-registration of a removed id is refused.
        let (again, _rx2, _c2) = register(&mut actor, 2, "dev-1");
        assert!(matches!(again, Err(RegistryError::DeviceRemoved(_))));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let (mut actor, _events) = create_actor();

        for i in 0..MAX_DEVICES {
            let (result, _rx, _close) = register(&mut actor, i as u64, &format!("dev-{i}"));
            result.expect("registration under capacity");
        }

        let (overflow, _rx, _close) = register(&mut actor, 9999, "one-too-many");
        assert!(matches!(
            overflow,
            Err(RegistryError::RegistryFull { max: MAX_DEVICES })
        ));
        assert_eq!(actor.device_count(), MAX_DEVICES);
    }

    #[tokio::test]
    async fn test_reregistration_of_offline_device_allowed() {
        let (mut actor, _events) = create_actor();
        let (result, _rx, _close) = register(&mut actor, 1, "dev-1");
        result.expect("register");
        actor
            .handle_mark_offline(&DeviceId::new("dev-1"), DisconnectReason::HeartbeatTimeout)
            .expect("demote");

        let (again, _rx2, _c2) = register(&mut actor, 2, "dev-1");
        let view = again.expect("offline device reconnects");
        assert_eq!(view.status, DeviceStatus::Online);
        assert_eq!(view.registration_count, 2);
    }

    #[tokio::test]
    async fn test_lookup_and_list_commands() {
        let (mut actor, _events) = create_actor();
        let (result, _rx, _close) = register(&mut actor, 1, "dev-1");
        result.expect("register");

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Lookup {
            device_id: DeviceId::new("dev-1"),
            respond_to: tx,
        });
        assert!(rx.await.expect("lookup response").is_some());

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::ListAll { respond_to: tx });
        assert_eq!(rx.await.expect("list response").len(), 1);
    }
}
