//! dfc-core - Shared domain types for the display fleet coordinator
//!
//! This crate provides the core domain types shared between
//! the coordinator daemon (dfcd) and the device agent (dfc-player).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod error;

// Re-exports for convenience
pub use device::{
    ConnectionId, Device, DeviceId, DeviceStatus, DeviceView, DisconnectReason,
};
pub use error::{DomainError, DomainResult};
