//! Connection manager: one device's end of the fleet protocol.
//!
//! State machine: `Discovering → Connecting → Connected → Reconnecting →
//! Connecting → …`. The manager runs on its own task and never blocks the
//! embedding loop; every transition and inbound application envelope is
//! delivered through the event channel, so a presentation loop can show a
//! "searching for coordinator" indicator while the manager works.
//!
//! Reconnection continues indefinitely - there is no give-up state. The
//! backoff attempt counter resets only after a completed registration
//! (REGISTER_ACK received); a transport connect whose REGISTER is
//! rejected keeps the counter where it was.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dfc_core::DeviceId;
use dfc_protocol::{
    tags, CommandPayload, ContentUpdatePayload, Envelope, ErrorPayload, RegisterAckPayload,
    RegisterRejectedPayload,
};

use crate::backoff::ReconnectBackoff;
use crate::config::PlayerConfig;
use crate::discovery::{DiscoveryClient, DiscoveryError};

// ============================================================================
// State & Events
// ============================================================================

/// Where the manager currently is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Probing the network for a coordinator.
    Discovering,
    /// Transport handshake and registration in progress.
    Connecting,
    /// Registered; heartbeats flowing.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting { attempt: u32 },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovering => write!(f, "searching for coordinator"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Everything the manager reports to the embedding loop.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The lifecycle state changed.
    StateChanged(ConnectionState),

    /// Registration completed; the coordinator set the heartbeat cadence.
    Registered {
        device_id: DeviceId,
        heartbeat_interval: Duration,
    },

    /// Coordinator sent a command.
    Command { name: String, params: Value },

    /// Coordinator assigned new content.
    ContentUpdate { content_ref: String },

    /// Coordinator reported a non-fatal error.
    CoordinatorError {
        message: String,
        code: Option<String>,
    },
}

// ============================================================================
// Settings
// ============================================================================

/// Runtime settings of the connection manager.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub device_id: DeviceId,
    pub display_name: String,
    pub credential: Option<String>,
    /// Fallback endpoint when discovery times out.
    pub static_endpoint: Option<String>,
    pub discovery: DiscoveryClient,
    pub connect_timeout: Duration,
    pub registration_timeout: Duration,
    /// Cadence used until REGISTER_ACK supplies the coordinator's.
    pub heartbeat_interval: Duration,
    pub backoff: ReconnectBackoff,
}

impl PlayerSettings {
    /// Builds settings from a loaded config file.
    ///
    /// The config must already carry a device id (see
    /// [`PlayerConfig::load_or_init`]).
    pub fn from_config(config: &PlayerConfig) -> Result<Self, PlayerError> {
        let device_id = config
            .device_id
            .as_deref()
            .ok_or_else(|| PlayerError::Config("config has no device_id".to_string()))?;

        Ok(Self {
            device_id: DeviceId::new(device_id),
            display_name: config.display_name.clone(),
            credential: config.credential.clone(),
            static_endpoint: config.static_endpoint.clone(),
            discovery: DiscoveryClient::new(
                config.discovery_port,
                Duration::from_secs(config.discovery_timeout_secs.max(1)),
            ),
            connect_timeout: Duration::from_secs(10),
            registration_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            backoff: ReconnectBackoff::default(),
        })
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

/// Drives discovery, registration, heartbeats, and recovery for one device.
pub struct ConnectionManager {
    settings: PlayerSettings,
    event_tx: mpsc::UnboundedSender<PlayerEvent>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        settings: PlayerSettings,
        event_tx: mpsc::UnboundedSender<PlayerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            event_tx,
            cancel,
        }
    }

    /// Runs the manager on its own task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Main lifecycle loop. Returns only when cancelled.
    pub async fn run(self) {
        info!(device_id = %self.settings.device_id, "connection manager starting");
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Rendezvous: discovery, with the static endpoint as fallback.
            self.set_state(ConnectionState::Discovering);
            let Some(endpoint) = self.discover_endpoint().await else {
                break; // cancelled
            };

            self.set_state(ConnectionState::Connecting);
            let registered = tokio::select! {
                outcome = self.connect_and_run(&endpoint) => match outcome {
                    Ok(registered) => registered,
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "connection attempt failed");
                        false
                    }
                },
                _ = self.cancel.cancelled() => break,
            };

            // The counter resets only after a completed registration, not
            // after a bare transport connect.
            if registered {
                attempt = 0;
            }

            if self.cancel.is_cancelled() {
                break;
            }

            attempt = attempt.saturating_add(1);
            self.set_state(ConnectionState::Reconnecting { attempt });
            let delay = self.settings.backoff.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        info!(device_id = %self.settings.device_id, "connection manager stopped");
    }

    /// Runs discovery rounds until an endpoint is found or cancellation.
    ///
    /// Returns `None` only when cancelled: without a static fallback the
    /// device keeps probing for as long as it is powered.
    async fn discover_endpoint(&self) -> Option<String> {
        loop {
            let probe = tokio::select! {
                result = self.settings.discovery.probe() => result,
                _ = self.cancel.cancelled() => return None,
            };

            match probe {
                Ok(advert) => match DiscoveryClient::endpoint_from(&advert) {
                    Ok(endpoint) => {
                        info!(endpoint = %endpoint, server = %advert.server, "coordinator discovered");
                        return Some(endpoint);
                    }
                    Err(e) => {
                        debug!(error = %e, "unusable advertisement");
                    }
                },
                Err(DiscoveryError::Timeout) => {
                    debug!("discovery timed out");
                }
                Err(e) => {
                    debug!(error = %e, "discovery failed");
                }
            }

            if let Some(endpoint) = &self.settings.static_endpoint {
                info!(endpoint = %endpoint, "falling back to static endpoint");
                return Some(endpoint.clone());
            }
            // No fallback: stay in Discovering and probe again.
        }
    }

    /// One connection lifecycle: connect, register, heartbeat, process
    /// inbound traffic.
    ///
    /// Returns `Ok(true)` once registration completed before the
    /// connection ended, `Err` or `Ok(false)` otherwise.
    async fn connect_and_run(&self, endpoint: &str) -> Result<bool, PlayerError> {
        debug!(endpoint = %endpoint, "dialing coordinator");

        let (ws, _response) = timeout(
            self.settings.connect_timeout,
            tokio_tungstenite::connect_async(endpoint),
        )
        .await
        .map_err(|_| PlayerError::ConnectTimeout)?
        .map_err(|e| PlayerError::Transport(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();

        let register = Envelope::register(
            self.settings.device_id.as_str(),
            &self.settings.display_name,
            self.settings.credential.clone(),
        );
        send_envelope(&mut sink, &register).await?;

        // Registration must complete within the timeout; a timed-out
        // handshake is the same as a failed one.
        let ack = timeout(
            self.settings.registration_timeout,
            wait_for_ack(&mut stream),
        )
        .await
        .map_err(|_| PlayerError::RegistrationTimeout)??;

        let heartbeat_interval = Duration::from_secs(ack.heartbeat_interval_secs.max(1));
        info!(
            device_id = %self.settings.device_id,
            heartbeat_secs = heartbeat_interval.as_secs(),
            "registered with coordinator"
        );
        self.emit(PlayerEvent::Registered {
            device_id: self.settings.device_id.clone(),
            heartbeat_interval,
        });
        self.set_state(ConnectionState::Connected);

        // Steady state: heartbeats out, commands/content in.
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(true);
                }

                _ = heartbeat.tick() => {
                    let beat = Envelope::heartbeat(self.settings.device_id.as_str(), None);
                    if send_envelope(&mut sink, &beat).await.is_err() {
                        debug!("heartbeat write failed, connection is gone");
                        return Ok(true);
                    }
                }

                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                    Some(Ok(Message::Close(_))) => {
                        info!("coordinator closed the connection");
                        return Ok(true);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "transport error");
                        return Ok(true);
                    }
                    None => {
                        debug!("connection EOF");
                        return Ok(true);
                    }
                },
            }
        }
    }

    /// Handles one inbound text frame. Protocol errors are logged and
    /// dropped; they never end the connection.
    fn handle_inbound(&self, raw: &str) {
        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "dropping malformed inbound frame");
                return;
            }
        };

        match envelope.tag.as_str() {
            tags::COMMAND => match envelope.parse_payload::<CommandPayload>() {
                Ok(payload) => self.emit(PlayerEvent::Command {
                    name: payload.name,
                    params: payload.params,
                }),
                Err(e) => debug!(error = %e, "dropping invalid COMMAND"),
            },
            tags::CONTENT_UPDATE => match envelope.parse_payload::<ContentUpdatePayload>() {
                Ok(payload) => self.emit(PlayerEvent::ContentUpdate {
                    content_ref: payload.content_ref,
                }),
                Err(e) => debug!(error = %e, "dropping invalid CONTENT_UPDATE"),
            },
            tags::ERROR => match envelope.parse_payload::<ErrorPayload>() {
                Ok(payload) => {
                    warn!(message = %payload.message, code = ?payload.code, "coordinator error");
                    self.emit(PlayerEvent::CoordinatorError {
                        message: payload.message,
                        code: payload.code,
                    });
                }
                Err(e) => debug!(error = %e, "dropping invalid ERROR"),
            },
            other => {
                debug!(tag = %other, "dropping envelope with unknown type");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(state = %state, "state changed");
        self.emit(PlayerEvent::StateChanged(state));
    }

    /// Event delivery is best-effort: a dropped receiver must not stop
    /// the manager from keeping the device registered.
    fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ============================================================================
// Wire Helpers
// ============================================================================

async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<(), PlayerError>
where
    S: SinkExt<Message> + Unpin,
{
    let json = envelope
        .to_json()
        .map_err(|e| PlayerError::Protocol(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|_| PlayerError::Transport("write failed".to_string()))
}

/// Reads frames until the registration outcome arrives.
async fn wait_for_ack<S>(stream: &mut S) -> Result<RegisterAckPayload, PlayerError>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(envelope) = Envelope::from_json(&text) else {
                    continue;
                };
                match envelope.tag.as_str() {
                    tags::REGISTER_ACK => {
                        return envelope
                            .parse_payload()
                            .map_err(|e| PlayerError::Protocol(e.to_string()));
                    }
                    tags::REGISTER_REJECTED => {
                        let reason = envelope
                            .parse_payload::<RegisterRejectedPayload>()
                            .map(|p| p.reason)
                            .unwrap_or_else(|_| "unspecified".to_string());
                        return Err(PlayerError::Rejected(reason));
                    }
                    _ => continue,
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(PlayerError::Transport(
                    "connection closed before registration completed".to_string(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(PlayerError::Transport(e.to_string())),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors in the device-side connection lifecycle. All of them feed the
/// reconnect loop; none are fatal to the player process.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("no registration outcome within the timeout")]
    RegistrationTimeout,

    #[error("registration rejected: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> PlayerSettings {
        PlayerSettings {
            device_id: DeviceId::new("display-1"),
            display_name: "Test Display".to_string(),
            credential: None,
            static_endpoint: None,
            discovery: DiscoveryClient::new(5555, Duration::from_secs(1)),
            connect_timeout: Duration::from_secs(10),
            registration_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            backoff: ReconnectBackoff::default(),
        }
    }

    fn test_manager() -> (ConnectionManager, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(test_settings(), event_tx, CancellationToken::new());
        (manager, event_rx)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ConnectionState::Discovering.to_string(),
            "searching for coordinator"
        );
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
    }

    #[test]
    fn test_settings_from_config_requires_device_id() {
        let config = PlayerConfig::default();
        let result = PlayerSettings::from_config(&config);
        assert!(matches!(result, Err(PlayerError::Config(_))));

        let config = PlayerConfig {
            device_id: Some("display-9".to_string()),
            ..Default::default()
        };
        let settings = PlayerSettings::from_config(&config).expect("settings");
        assert_eq!(settings.device_id.as_str(), "display-9");
    }

    #[tokio::test]
    async fn test_inbound_command_becomes_event() {
        let (manager, mut events) = test_manager();

        let raw = Envelope::command("reboot", serde_json::json!({"delay": 5}))
            .to_json()
            .unwrap();
        manager.handle_inbound(&raw);

        match events.try_recv().expect("event") {
            PlayerEvent::Command { name, params } => {
                assert_eq!(name, "reboot");
                assert_eq!(params["delay"], 5);
            }
            other => panic!("expected Command event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inbound_content_update_becomes_event() {
        let (manager, mut events) = test_manager();

        let raw = Envelope::content_update("playlist-5").to_json().unwrap();
        manager.handle_inbound(&raw);

        match events.try_recv().expect("event") {
            PlayerEvent::ContentUpdate { content_ref } => {
                assert_eq!(content_ref, "playlist-5");
            }
            other => panic!("expected ContentUpdate event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_inbound_tag_is_dropped_silently() {
        let (manager, mut events) = test_manager();

        manager.handle_inbound(r#"{"type":"MYSTERY","x":1}"#);
        manager.handle_inbound("not json");

        assert!(events.try_recv().is_err(), "no events for dropped frames");
    }

    #[tokio::test]
    async fn test_cancelled_manager_stops_quickly() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(test_settings(), event_tx, cancel.clone());

        cancel.cancel();

        let start = std::time::Instant::now();
        manager.run().await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
