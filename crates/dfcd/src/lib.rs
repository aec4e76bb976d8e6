//! dfc daemon - device registry, gateway, and discovery responder
//!
//! This crate provides the coordinator side of the display fleet:
//! - `registry` - Device registry actor, the single owner of fleet state
//! - `server` - WebSocket gateway accepting device connections
//! - `dispatch` - The closed-vocabulary envelope dispatch table
//! - `heartbeat` - Liveness monitor demoting silent devices
//! - `discovery` - UDP responder answering "where is the coordinator" probes
//! - `metrics` - Daemon self-monitoring (CPU/memory)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        dfcd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐      ┌────────────────────────────┐   │
//! │  │  GatewayServer  │─────▶│       RegistryActor        │   │
//! │  │  (WebSocket)    │      │   (device state owner)     │   │
//! │  └────────┬────────┘      └──────────────┬─────────────┘   │
//! │           │ per-connection               │ events           │
//! │           ▼                              ▼                  │
//! │  ┌─────────────────┐      ┌────────────────────────────┐   │
//! │  │ConnectionHandler│─────▶│     broadcast::Sender      │   │
//! │  │ + Dispatcher    │      │  (collaborator delivery)   │   │
//! │  └─────────────────┘      └────────────────────────────┘   │
//! │                                                             │
//! │  ┌─────────────────┐      ┌────────────────────────────┐   │
//! │  │HeartbeatMonitor │      │    DiscoveryResponder      │   │
//! │  │ (periodic scan) │      │       (UDP :5555)          │   │
//! │  └─────────────────┘      └────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod heartbeat;
pub mod metrics;
pub mod registry;
pub mod server;
