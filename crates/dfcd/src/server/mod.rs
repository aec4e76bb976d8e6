//! WebSocket gateway for the coordinator daemon.
//!
//! The gateway:
//! - Listens on a TCP socket and upgrades each connection to WebSocket
//! - Spawns a ConnectionHandler for each device
//! - Tracks connection tasks so shutdown can await in-flight work
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  GatewayServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() + WS upgrade
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   Dispatcher    │
//! │  (per device)   │     │  (tag routing)  │
//! └───────┬─────────┘     └─────────────────┘
//!         │
//!         ▼
//! ┌─────────────────┐
//! │  RegistryHandle │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps accepting
//! - Transport errors are fatal to one connection, never to the process

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use dfc_core::ConnectionId;

use crate::config::CoordinatorConfig;
use crate::dispatch::Dispatcher;
use crate::registry::RegistryHandle;

/// WebSocket gateway server.
///
/// Accepts device connections and services each on its own task.
pub struct GatewayServer {
    listener: TcpListener,
    registry: RegistryHandle,
    dispatcher: Arc<Dispatcher>,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
    tracker: TaskTracker,
    registration_timeout: Duration,
    shutdown_grace: Duration,
}

impl GatewayServer {
    /// Binds the gateway listener.
    ///
    /// Binding is separate from [`run`](Self::run) so callers (and tests)
    /// can learn the bound address before the accept loop starts.
    pub async fn bind(
        config: &CoordinatorConfig,
        registry: RegistryHandle,
        dispatcher: Dispatcher,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.bind_addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            dispatcher: Arc::new(dispatcher),
            cancel_token,
            connection_counter: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            registration_timeout: config.registration_timeout,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Io(e.to_string()))
    }

    /// Runs the accept loop until the cancellation token fires, then waits
    /// for in-flight connection tasks within the shutdown grace period.
    /// This method does not return until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        match self.local_addr() {
            Ok(addr) => info!(addr = %addr, "gateway listening"),
            Err(_) => info!("gateway listening"),
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("gateway shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let number = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, number);
                        }
                        Err(e) => {
                            // Accept failure is a resource error; keep serving.
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Spawns the handler task for one accepted transport connection.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, number: u64) {
        let connection_id = ConnectionId::new(number);
        let registry = self.registry.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let close = self.cancel_token.child_token();
        let registration_timeout = self.registration_timeout;

        self.tracker.spawn(async move {
            // The WebSocket upgrade gets the same bounded patience as the
            // registration that must follow it.
            let ws = match timeout(
                registration_timeout,
                tokio_tungstenite::accept_async(stream),
            )
            .await
            {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    warn!(connection_id = %connection_id, peer = %peer, error = %e, "websocket upgrade failed");
                    return;
                }
                Err(_) => {
                    warn!(connection_id = %connection_id, peer = %peer, "websocket upgrade timed out");
                    return;
                }
            };

            debug!(connection_id = %connection_id, peer = %peer, "transport connected");

            let handler = ConnectionHandler::new(
                connection_id,
                peer,
                ws,
                dispatcher,
                close,
                registration_timeout,
            );

            let device_id = handler.run().await;

            // The registry decides whether this close demotes the device:
            // only if this connection is still the active association.
            registry.connection_closed(connection_id).await;

            info!(
                connection_id = %connection_id,
                device_id = ?device_id,
                "connection finished"
            );
        });
    }

    /// Waits for in-flight connection tasks, bounded by the grace period.
    async fn shutdown(&self) {
        self.tracker.close();

        if timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "connection tasks did not finish within grace period"
            );
        }

        info!("gateway shutdown complete");
    }
}

/// Errors that can occur in gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind gateway at {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("gateway I/O error: {0}")]
    Io(String),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}
