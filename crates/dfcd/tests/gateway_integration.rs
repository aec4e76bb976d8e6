//! Integration tests for the WebSocket gateway.
//!
//! These tests run the real gateway on an ephemeral port and drive it
//! with tokio-tungstenite clients: registration handshake, unknown tags,
//! supersede, outbound delivery, close demotion, and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - the panic-free policy
//! applies to production code, which these assertions verify.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use dfc_core::{DeviceId, DeviceStatus};
use dfc_protocol::{tags, Envelope};
use dfcd::config::CoordinatorConfig;
use dfcd::dispatch::build_dispatcher;
use dfcd::registry::{spawn_registry, RegistryHandle};
use dfcd::server::GatewayServer;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single protocol exchange in these tests.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period for server-side state to settle after a transport event.
const SETTLE_PERIOD: Duration = Duration::from_millis(50);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test coordinator that manages gateway lifecycle and cleanup.
struct TestCoordinator {
    addr: SocketAddr,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
}

impl TestCoordinator {
    /// Spawns a gateway on an ephemeral port.
    async fn spawn() -> Self {
        Self::spawn_with_config(CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().expect("bind addr"),
            ..Default::default()
        })
        .await
    }

    async fn spawn_with_config(config: CoordinatorConfig) -> Self {
        let registry = spawn_registry();
        let dispatcher = build_dispatcher(registry.clone(), &config);
        let cancel_token = CancellationToken::new();

        let server = GatewayServer::bind(
            &config,
            registry.clone(),
            dispatcher,
            cancel_token.clone(),
        )
        .await
        .expect("bind gateway");
        let addr = server.local_addr().expect("local addr");

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            registry,
            cancel_token,
        }
    }

    /// Connects a device-side test client.
    async fn connect(&self) -> TestDevice {
        let url = format!("ws://{}/ws", self.addr);
        let (ws, _response) = connect_async(&url).await.expect("connect to gateway");
        TestDevice { ws }
    }

    /// Polls until the device reaches the wanted status or times out.
    async fn await_status(&self, device_id: &str, wanted: DeviceStatus) {
        let deadline = tokio::time::Instant::now() + EXCHANGE_TIMEOUT;
        loop {
            if let Some(view) = self.registry.lookup(DeviceId::new(device_id)).await {
                if view.status == wanted {
                    return;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "device {device_id} did not reach {wanted} in time"
            );
            sleep(SETTLE_PERIOD).await;
        }
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SETTLE_PERIOD).await;
    }
}

/// Device-side test client with protocol helpers.
struct TestDevice {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestDevice {
    async fn send(&mut self, envelope: Envelope) {
        let json = envelope.to_json().expect("serialize envelope");
        self.ws
            .send(Message::Text(json))
            .await
            .expect("send envelope");
    }

    async fn send_raw(&mut self, raw: &str) {
        self.ws
            .send(Message::Text(raw.to_string()))
            .await
            .expect("send raw frame");
    }

    /// Receives the next envelope, skipping transport-level frames.
    async fn recv(&mut self) -> Envelope {
        let deadline = timeout(EXCHANGE_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Envelope::from_json(&text).expect("parse envelope");
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended while awaiting envelope: {other:?}"),
                }
            }
        });
        deadline.await.expect("envelope within timeout")
    }

    /// Registers and asserts the ack.
    async fn register(&mut self, device_id: &str) {
        self.send(Envelope::register(device_id, device_id, None))
            .await;
        let ack = self.recv().await;
        assert_eq!(ack.tag, tags::REGISTER_ACK, "expected ack, got {ack:?}");
        assert_eq!(ack.payload_str("device_id"), Some(device_id));
    }

    /// True once the server has closed this connection.
    async fn is_closed(&mut self) -> bool {
        match timeout(EXCHANGE_TIMEOUT, self.ws.next()).await {
            Ok(None) => true,
            Ok(Some(Ok(Message::Close(_)))) => true,
            Ok(Some(Err(_))) => true,
            _ => false,
        }
    }
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_register_heartbeat_flow() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;

    device.register("lobby-1").await;
    coordinator.await_status("lobby-1", DeviceStatus::Online).await;

    device.send(Envelope::heartbeat("lobby-1", None)).await;
    sleep(SETTLE_PERIOD).await;

    let view = coordinator
        .registry
        .lookup(DeviceId::new("lobby-1"))
        .await
        .expect("device view");
    assert_eq!(view.status, DeviceStatus::Online);
    assert!(view.last_heartbeat.is_some());
    assert!(view.heartbeat_age_secs.unwrap_or(u64::MAX) <= 1);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_register_ack_carries_heartbeat_interval() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;

    device.send(Envelope::register("dev-1", "Dev 1", None)).await;
    let ack = device.recv().await;

    assert_eq!(ack.tag, tags::REGISTER_ACK);
    let interval = ack
        .payload
        .get("heartbeat_interval_secs")
        .and_then(|v| v.as_u64())
        .expect("interval field");
    assert!(interval >= 1);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_first_message_must_be_register() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;

    device.send(Envelope::heartbeat("dev-1", None)).await;

    let error = device.recv().await;
    assert_eq!(error.tag, tags::ERROR);
    assert!(device.is_closed().await, "handshake violation drops the connection");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_bad_credential_rejected() {
    let coordinator = TestCoordinator::spawn_with_config(CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().expect("bind addr"),
        auth_token: Some("fleet-secret".to_string()),
        ..Default::default()
    })
    .await;
    let mut device = coordinator.connect().await;

    device
        .send(Envelope::register("dev-1", "Dev 1", Some("wrong".to_string())))
        .await;

    let rejected = device.recv().await;
    assert_eq!(rejected.tag, tags::REGISTER_REJECTED);
    assert!(device.is_closed().await);

    // The device never made it into the registry.
    assert!(coordinator.registry.lookup(DeviceId::new("dev-1")).await.is_none());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_good_credential_accepted() {
    let coordinator = TestCoordinator::spawn_with_config(CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().expect("bind addr"),
        auth_token: Some("fleet-secret".to_string()),
        ..Default::default()
    })
    .await;
    let mut device = coordinator.connect().await;

    device
        .send(Envelope::register(
            "dev-1",
            "Dev 1",
            Some("fleet-secret".to_string()),
        ))
        .await;
    let ack = device.recv().await;
    assert_eq!(ack.tag, tags::REGISTER_ACK);

    coordinator.shutdown().await;
}

// ============================================================================
// Protocol Error Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_type_keeps_session_alive() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;
    device.register("dev-1").await;

    device.send_raw(r#"{"type":"FROBNICATE","x":1}"#).await;
    let error = device.recv().await;
    assert_eq!(error.tag, tags::ERROR);
    assert_eq!(error.payload_str("code"), Some("unknown_type"));

    // The session survives: heartbeats still land.
    device.send(Envelope::heartbeat("dev-1", None)).await;
    sleep(SETTLE_PERIOD).await;
    let view = coordinator
        .registry
        .lookup(DeviceId::new("dev-1"))
        .await
        .expect("view");
    assert_eq!(view.status, DeviceStatus::Online);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_malformed_envelope_keeps_session_alive() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;
    device.register("dev-1").await;

    device.send_raw("{not json").await;
    let error = device.recv().await;
    assert_eq!(error.tag, tags::ERROR);
    assert_eq!(error.payload_str("code"), Some("malformed"));

    device.send(Envelope::heartbeat("dev-1", None)).await;
    sleep(SETTLE_PERIOD).await;
    assert_eq!(
        coordinator
            .registry
            .lookup(DeviceId::new("dev-1"))
            .await
            .expect("view")
            .status,
        DeviceStatus::Online
    );

    coordinator.shutdown().await;
}

// ============================================================================
// Supersede Tests
// ============================================================================

#[tokio::test]
async fn test_last_registration_wins() {
    let coordinator = TestCoordinator::spawn().await;

    let mut first = coordinator.connect().await;
    first.register("kiosk-1").await;

    let mut second = coordinator.connect().await;
    second.register("kiosk-1").await;

    // The first connection is observably closed.
    assert!(first.is_closed().await, "superseded connection must close");

    // Outbound traffic lands on the second connection.
    coordinator
        .registry
        .send_to_device(
            DeviceId::new("kiosk-1"),
            Envelope::command("identify", serde_json::json!({})),
        )
        .await
        .expect("send to winner");
    let command = second.recv().await;
    assert_eq!(command.tag, tags::COMMAND);

    let view = coordinator
        .registry
        .lookup(DeviceId::new("kiosk-1"))
        .await
        .expect("view");
    assert_eq!(view.status, DeviceStatus::Online);
    assert_eq!(view.registration_count, 2);

    coordinator.shutdown().await;
}

// ============================================================================
// Disconnect Tests
// ============================================================================

#[tokio::test]
async fn test_transport_close_demotes_device() {
    let coordinator = TestCoordinator::spawn().await;

    let mut device = coordinator.connect().await;
    device.register("dev-1").await;
    coordinator.await_status("dev-1", DeviceStatus::Online).await;

    drop(device);

    coordinator.await_status("dev-1", DeviceStatus::Offline).await;

    // Sends now fail with a connection error.
    let result = coordinator
        .registry
        .send_to_device(
            DeviceId::new("dev-1"),
            Envelope::command("noop", serde_json::json!({})),
        )
        .await;
    assert!(result.is_err());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_content_update_delivery() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;
    device.register("dev-1").await;

    coordinator
        .registry
        .assign_content(DeviceId::new("dev-1"), "playlist-12".to_string())
        .await
        .expect("assign content");

    let update = device.recv().await;
    assert_eq!(update.tag, tags::CONTENT_UPDATE);
    assert_eq!(update.payload_str("content_ref"), Some("playlist-12"));

    coordinator.shutdown().await;
}

// ============================================================================
// Concurrent Device Tests
// ============================================================================

#[tokio::test]
async fn test_many_devices_register_concurrently() {
    let coordinator = TestCoordinator::spawn().await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let addr = coordinator.addr;
        tasks.push(tokio::spawn(async move {
            let url = format!("ws://{addr}/ws");
            let (ws, _) = connect_async(&url).await.expect("connect");
            let mut device = TestDevice { ws };
            device.register(&format!("wall-{i}")).await;
            device.send(Envelope::heartbeat(format!("wall-{i}"), None)).await;
            device
        }));
    }

    let mut devices = Vec::new();
    for task in tasks {
        devices.push(task.await.expect("device task"));
    }

    sleep(SETTLE_PERIOD).await;
    let views = coordinator.registry.list_all().await;
    assert_eq!(views.len(), 20);
    assert!(views.iter().all(|v| v.status == DeviceStatus::Online));

    coordinator.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_graceful_shutdown_closes_connections() {
    let coordinator = TestCoordinator::spawn().await;
    let mut device = coordinator.connect().await;
    device.register("dev-1").await;

    let addr = coordinator.addr;
    coordinator.shutdown().await;

    assert!(device.is_closed().await, "shutdown closes device connections");

    // No new connections are accepted after shutdown.
    let refused = connect_async(format!("ws://{addr}/ws")).await;
    assert!(refused.is_err());
}
