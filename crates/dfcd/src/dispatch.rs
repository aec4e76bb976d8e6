//! Envelope dispatch: the closed protocol vocabulary, routed.
//!
//! The `Dispatcher` maps message tags to handlers. It is built once at
//! startup from the constants in [`dfc_protocol::tags`] and never mutated
//! afterwards, so the full inbound protocol surface is auditable in this
//! one file.
//!
//! Error discipline at the dispatch boundary:
//! - missing/empty tag → [`DispatchError::MalformedEnvelope`], message
//!   dropped, connection stays open
//! - unregistered tag → [`DispatchError::UnknownMessageType`], message
//!   dropped, connection stays open
//! - handler failure → caught here, logged with connection id and tag,
//!   connection stays open. One bad message never takes down a session.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dfc_core::{ConnectionId, DeviceId};
use dfc_protocol::{
    tags, Envelope, EnvelopeError, HeartbeatPayload, ProtocolVersion, RegisterPayload,
    StatusPayload,
};

use crate::config::CoordinatorConfig;
use crate::registry::{RegistryError, RegistryHandle};

// ============================================================================
// Context
// ============================================================================

/// Per-connection state handed to every handler invocation.
#[derive(Clone)]
pub struct DispatchContext {
    /// Identity of the connection the envelope arrived on.
    pub connection_id: ConnectionId,

    /// Peer address, for logging and registry metadata.
    pub remote_addr: Option<String>,

    /// Outbound sink of this connection's writer task.
    pub reply: mpsc::Sender<Envelope>,

    /// Cancelling this token closes the connection.
    pub close: CancellationToken,

    /// Set exactly once, by the REGISTER handler on success. Later
    /// handlers use it to pin envelopes to the registered identity.
    pub device: Arc<OnceLock<DeviceId>>,
}

impl DispatchContext {
    /// Best-effort reply; a failed enqueue means the connection is
    /// already going down, which the read loop will notice on its own.
    async fn send_reply(&self, envelope: Envelope) {
        if self.reply.send(envelope).await.is_err() {
            debug!(connection_id = %self.connection_id, "reply dropped, writer gone");
        }
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// One entry in the dispatch table.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &DispatchContext, envelope: &Envelope)
        -> Result<(), HandlerError>;
}

/// Failures a handler can produce. All of them are recoverable at the
/// session level unless the handler itself cancelled the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload did not match the tag's required shape.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// Registration was refused (version, credential, capacity). The
    /// handler has already answered and closed the connection.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// The registry refused the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<EnvelopeError> for HandlerError {
    fn from(e: EnvelopeError) -> Self {
        Self::Payload(e.to_string())
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Errors surfaced at the dispatch boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown message type: {tag}")]
    UnknownMessageType { tag: String },

    #[error("handler for {tag} failed: {source}")]
    Handler {
        tag: String,
        #[source]
        source: HandlerError,
    },
}

/// The fixed tag → handler table.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

/// Builder for the table. Consumed by [`DispatcherBuilder::build`] so the
/// finished table cannot be mutated at runtime.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl DispatcherBuilder {
    pub fn handle(mut self, tag: &'static str, handler: impl MessageHandler) -> Self {
        self.handlers.insert(tag, Arc::new(handler));
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// The registered vocabulary, sorted. This is the authoritative
    /// answer to "what does this coordinator accept".
    pub fn registered_tags(&self) -> Vec<&'static str> {
        let mut registered: Vec<_> = self.handlers.keys().copied().collect();
        registered.sort_unstable();
        registered
    }

    /// Parses a raw text frame and invokes exactly one handler.
    pub async fn dispatch(&self, ctx: &DispatchContext, raw: &str) -> Result<(), DispatchError> {
        let envelope = Envelope::from_json(raw)
            .map_err(|e| DispatchError::MalformedEnvelope(e.to_string()))?;

        let Some(handler) = self.handlers.get(envelope.tag.as_str()) else {
            warn!(
                connection_id = %ctx.connection_id,
                tag = %envelope.tag,
                "dropping envelope with unknown type"
            );
            return Err(DispatchError::UnknownMessageType { tag: envelope.tag });
        };

        if let Err(source) = handler.handle(ctx, &envelope).await {
            warn!(
                connection_id = %ctx.connection_id,
                tag = %envelope.tag,
                error = %source,
                "message handler failed"
            );
            return Err(DispatchError::Handler {
                tag: envelope.tag,
                source,
            });
        }

        debug!(
            connection_id = %ctx.connection_id,
            tag = %envelope.tag,
            "envelope dispatched"
        );
        Ok(())
    }
}

/// Builds the coordinator's dispatch table. Called once at startup; the
/// tag set here is the complete inbound vocabulary.
pub fn build_dispatcher(registry: RegistryHandle, config: &CoordinatorConfig) -> Dispatcher {
    Dispatcher::builder()
        .handle(
            tags::REGISTER,
            RegisterHandler {
                registry: registry.clone(),
                auth_token: config.auth_token.clone(),
                heartbeat_interval_secs: config.heartbeat_interval_secs(),
            },
        )
        .handle(
            tags::HEARTBEAT,
            HeartbeatHandler {
                registry: registry.clone(),
            },
        )
        .handle(tags::STATUS, StatusHandler { registry })
        .build()
}

// ============================================================================
// Standard Handlers
// ============================================================================

/// REGISTER: validates version and credential, installs the device →
/// connection association, and acknowledges with the heartbeat cadence.
pub struct RegisterHandler {
    pub registry: RegistryHandle,
    /// Opaque credential check. `None` means open registration.
    pub auth_token: Option<String>,
    pub heartbeat_interval_secs: u64,
}

#[async_trait]
impl MessageHandler for RegisterHandler {
    async fn handle(
        &self,
        ctx: &DispatchContext,
        envelope: &Envelope,
    ) -> Result<(), HandlerError> {
        let payload: RegisterPayload = envelope.parse_payload()?;

        if !payload
            .protocol_version
            .is_compatible_with(&ProtocolVersion::CURRENT)
        {
            let reason = format!(
                "protocol version {} not compatible with coordinator version {}",
                payload.protocol_version,
                ProtocolVersion::CURRENT
            );
            ctx.send_reply(Envelope::register_rejected(&reason)).await;
            ctx.close.cancel();
            return Err(HandlerError::Rejected(reason));
        }

        if let Some(expected) = &self.auth_token {
            if payload.credential.as_deref() != Some(expected.as_str()) {
                ctx.send_reply(Envelope::register_rejected("invalid credential"))
                    .await;
                ctx.close.cancel();
                return Err(HandlerError::Rejected("invalid credential".to_string()));
            }
        }

        let device_id = DeviceId::new(payload.device_id);
        let result = self
            .registry
            .register(
                ctx.connection_id,
                device_id.clone(),
                payload.display_name,
                ctx.remote_addr.clone(),
                ctx.reply.clone(),
                ctx.close.clone(),
            )
            .await;

        match result {
            Ok(view) => {
                let _ = ctx.device.set(device_id);
                ctx.send_reply(Envelope::register_ack(
                    view.id.as_str(),
                    self.heartbeat_interval_secs,
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                ctx.send_reply(Envelope::register_rejected(e.to_string())).await;
                ctx.close.cancel();
                Err(HandlerError::Registry(e))
            }
        }
    }
}

/// HEARTBEAT: refreshes the device's liveness timestamp.
pub struct HeartbeatHandler {
    pub registry: RegistryHandle,
}

#[async_trait]
impl MessageHandler for HeartbeatHandler {
    async fn handle(
        &self,
        ctx: &DispatchContext,
        envelope: &Envelope,
    ) -> Result<(), HandlerError> {
        let payload: HeartbeatPayload = envelope.parse_payload()?;
        let device_id = DeviceId::new(payload.device_id);

        verify_sender(ctx, &device_id)?;

        if let Err(e) = self.registry.heartbeat(device_id, payload.state).await {
            // Advisory only: the device should re-register, but a stray
            // heartbeat must not cost it the connection.
            ctx.send_reply(Envelope::error(e.to_string(), Some("unknown_device".to_string())))
                .await;
            return Err(HandlerError::Registry(e));
        }

        Ok(())
    }
}

/// STATUS: forwards an application-level report to collaborators.
pub struct StatusHandler {
    pub registry: RegistryHandle,
}

#[async_trait]
impl MessageHandler for StatusHandler {
    async fn handle(
        &self,
        ctx: &DispatchContext,
        envelope: &Envelope,
    ) -> Result<(), HandlerError> {
        let payload: StatusPayload = envelope.parse_payload()?;
        let device_id = DeviceId::new(payload.device_id);

        verify_sender(ctx, &device_id)?;

        self.registry
            .record_status(device_id, envelope.clone())
            .await?;
        Ok(())
    }
}

/// A connection may only speak for the device it registered as.
fn verify_sender(ctx: &DispatchContext, claimed: &DeviceId) -> Result<(), HandlerError> {
    match ctx.device.get() {
        Some(registered) if registered == claimed => Ok(()),
        Some(registered) => Err(HandlerError::Payload(format!(
            "device_id {claimed} does not match registered identity {registered}"
        ))),
        // Pre-registration traffic; the registry will answer UnknownDevice.
        None => Ok(()),
    }
}
