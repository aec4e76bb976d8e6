//! Connection handler for individual device connections.
//!
//! Each accepted WebSocket gets its own `ConnectionHandler` that:
//! - Requires a REGISTER envelope as the first frame (bounded wait)
//! - Runs a writer task draining the outbound envelope queue
//! - Reads frames and routes them through the dispatch table, strictly
//!   in arrival order (a REGISTER is fully applied before the next frame
//!   on the same connection is dispatched)
//! - Closes idempotently through its CancellationToken
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dfc_core::{ConnectionId, DeviceId};
use dfc_protocol::{tags, Envelope};

use crate::dispatch::{DispatchContext, DispatchError, Dispatcher};

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 64;

/// How long the writer gets to flush queued envelopes at close.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection handler for a single device.
pub struct ConnectionHandler {
    connection_id: ConnectionId,
    remote_addr: SocketAddr,
    ws: WebSocketStream<TcpStream>,
    dispatcher: Arc<Dispatcher>,
    /// Close signal; cancelling is the idempotent close operation.
    close: CancellationToken,
    registration_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        ws: WebSocketStream<TcpStream>,
        dispatcher: Arc<Dispatcher>,
        close: CancellationToken,
        registration_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            remote_addr,
            ws,
            dispatcher,
            close,
            registration_timeout,
        }
    }

    /// Runs the connection to completion.
    ///
    /// Returns the device id this connection registered as, if it got
    /// that far. The caller reports the close to the registry either way.
    pub async fn run(self) -> Option<DeviceId> {
        let Self {
            connection_id,
            remote_addr,
            ws,
            dispatcher,
            close,
            registration_timeout,
        } = self;

        let (mut ws_sink, mut ws_stream) = ws.split();

        // Writer task: drains the outbound queue into the socket. All
        // outbound traffic (handler replies, registry pushes) goes through
        // this one sender so writes never interleave. On close it flushes
        // what is already queued (a rejection must reach the device before
        // the socket goes away), then sends the close frame.
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_BUFFER);
        let writer_connection = connection_id;
        let writer_close = close.clone();
        let mut writer = tokio::spawn(async move {
            let send_envelope = |envelope: Envelope| {
                match envelope.to_json() {
                    Ok(json) => Some(Message::Text(json)),
                    Err(e) => {
                        warn!(connection_id = %writer_connection, error = %e, "dropping unserializable envelope");
                        None
                    }
                }
            };

            loop {
                tokio::select! {
                    biased;

                    _ = writer_close.cancelled() => {
                        while let Ok(envelope) = outbound_rx.try_recv() {
                            let Some(msg) = send_envelope(envelope) else { continue };
                            if ws_sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }

                    maybe = outbound_rx.recv() => match maybe {
                        Some(envelope) => {
                            let Some(msg) = send_envelope(envelope) else { continue };
                            if ws_sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = ws_sink.close().await;
        });

        let ctx = DispatchContext {
            connection_id,
            remote_addr: Some(remote_addr.to_string()),
            reply: outbound_tx.clone(),
            close: close.clone(),
            device: Arc::new(OnceLock::new()),
        };

        // Phase 1: the first frame must be a REGISTER, within the timeout.
        match Self::handshake(&ctx, &dispatcher, &mut ws_stream, registration_timeout).await {
            Ok(()) => {
                debug!(
                    connection_id = %connection_id,
                    device_id = ?ctx.device.get(),
                    "registration handshake complete"
                );
                // Phase 2: dispatch frames in arrival order until close.
                Self::read_loop(&ctx, &dispatcher, &mut ws_stream, &close).await;
            }
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "handshake failed");
            }
        }

        let device_id = ctx.device.get().cloned();

        // Close is idempotent: the token may already be cancelled (peer
        // close, supersede, shutdown) and cancelling again is a no-op.
        close.cancel();
        drop(ctx);
        drop(outbound_tx);
        if timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }

        device_id
    }

    /// Waits for and applies the REGISTER envelope.
    async fn handshake(
        ctx: &DispatchContext,
        dispatcher: &Dispatcher,
        stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
                  + Unpin),
        registration_timeout: Duration,
    ) -> Result<(), ConnectionError> {
        let first = timeout(registration_timeout, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text),
                    Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Eof),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| ConnectionError::RegistrationTimeout)??;

        let tag_is_register = Envelope::from_json(&first)
            .map(|envelope| envelope.tag == tags::REGISTER)
            .unwrap_or(false);
        if !tag_is_register {
            let _ = ctx
                .reply
                .send(Envelope::error(
                    "expected REGISTER as first message",
                    Some("handshake".to_string()),
                ))
                .await;
            return Err(ConnectionError::UnexpectedMessage);
        }

        // Route through the table like any other envelope; the REGISTER
        // handler replies (ack or rejection) and records the identity.
        let _ = dispatcher.dispatch(ctx, &first).await;

        if ctx.device.get().is_none() {
            return Err(ConnectionError::RegistrationRejected);
        }
        Ok(())
    }

    /// Serialized read/dispatch loop.
    async fn read_loop(
        ctx: &DispatchContext,
        dispatcher: &Dispatcher,
        stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
                  + Unpin),
        close: &CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = close.cancelled() => {
                    debug!(connection_id = %ctx.connection_id, "connection closed by token");
                    return;
                }
                msg = stream.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    match dispatcher.dispatch(ctx, &text).await {
                        Ok(()) => {}
                        Err(DispatchError::MalformedEnvelope(reason)) => {
                            // Fail soft: drop the message, keep the session.
                            let _ = ctx
                                .reply
                                .send(Envelope::error(reason, Some("malformed".to_string())))
                                .await;
                        }
                        Err(DispatchError::UnknownMessageType { tag }) => {
                            let _ = ctx
                                .reply
                                .send(Envelope::error(
                                    format!("unknown message type: {tag}"),
                                    Some("unknown_type".to_string()),
                                ))
                                .await;
                        }
                        Err(DispatchError::Handler { .. }) => {
                            // Already logged at the dispatch boundary, and
                            // handlers reply to the device where useful.
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection_id = %ctx.connection_id, "peer closed connection");
                    return;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id = %ctx.connection_id, "dropping binary frame");
                }
                Some(Ok(_)) => {
                    // WS-level ping/pong is handled by the transport.
                }
                Some(Err(e)) => {
                    // Framing violation or socket error: fail hard for
                    // this connection only.
                    debug!(connection_id = %ctx.connection_id, error = %e, "transport error");
                    return;
                }
                None => {
                    debug!(connection_id = %ctx.connection_id, "connection EOF");
                    return;
                }
            }
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Eof,

    #[error("no REGISTER within the registration timeout")]
    RegistrationTimeout,

    #[error("expected REGISTER as first message")]
    UnexpectedMessage,

    #[error("registration rejected")]
    RegistrationRejected,

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        assert_eq!(
            ConnectionError::RegistrationTimeout.to_string(),
            "no REGISTER within the registration timeout"
        );
        assert_eq!(
            ConnectionError::Transport("broken pipe".to_string()).to_string(),
            "transport error: broken pipe"
        );
    }
}
