//! Device registry using the actor pattern.
//!
//! The registry is the single source of truth for "which device maps to
//! which connection, and what is its status". It receives commands via a
//! tokio mpsc channel and publishes connect/disconnect/inbound events on
//! a broadcast channel for external collaborators.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionHandler │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └──────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                        │                        │
//!         │   RegistryCommand      │   DeviceEvent          │
//!         │   (mpsc channel)       │   (broadcast)          │
//!         ▼                        ▼                        ▼
//!    Register/Heartbeat      HashMap<DeviceId,        External
//!    per device              DeviceRecord>            collaborators
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_DEVICES};
pub use commands::{DeviceEvent, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawns the registry actor and returns a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Returns a RegistryHandle for client use
///
/// The heartbeat monitor is spawned separately (see [`crate::heartbeat`]);
/// it drives demotion through the same handle as every other caller.
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
