//! # beacon-core
//!
//! Presence tracking and notification fan-out for the Beacon hub.
//!
//! This crate provides the building blocks:
//!
//! - **Registry** - which identities are online, and through which connections
//! - **Hub** - the single coordinator that owns every registry mutation and
//!   every delivery
//! - **Connection** - one live transport with its read and write loops
//!
//! ## Architecture
//!
//! ```text
//!  producers ──deliver──▶ ┌─────────────┐   try_send   ┌────────┐   ┌─────────────┐
//!                         │ Coordinator │─────────────▶│ Outbox │──▶│ write loop  │──▶ wire
//!  read loop ─unregister─▶└─────────────┘              └────────┘   └─────────────┘
//!                                │ add / remove
//!                                ▼
//!                         ┌─────────────┐
//!                         │  Registry   │◀── is_online
//!                         └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod identity;
pub mod registry;

pub use connection::{
    outbox, CloseReason, Connection, ConnectionConfig, ConnectionHandle, ConnectionState,
    ConnectionStatus, Outbox, PushOutcome,
};
pub use hub::{Coordinator, DeliveryRequest, Hub, HubStats};
pub use identity::{ConnectionId, ConnectionKey, Identity};
pub use registry::Registry;
