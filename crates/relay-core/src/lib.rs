//! # relay-core
//!
//! Connection hub for the Relay broadcast server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - Slot arena of active connections
//! - **IngressPump** - Per-connection reader feeding the broadcast queue
//! - **EgressPump** - Per-connection writer with deadlines and keepalive
//! - **BroadcastHub** - Single-consumer fan-out with slow-consumer eviction
//!
//! ## Architecture
//!
//! ```text
//! peer ──▶ IngressPump ──▶ broadcast queue ──▶ BroadcastHub
//!                                                   │
//!                       ┌───────────────────────────┘
//!                       ▼
//!          per-connection outbound queue ──▶ EgressPump ──▶ peer
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tenvis_relay_core::{Relay, RelayConfig};
//! use tenvis_relay_transport::memory;
//!
//! let relay = Relay::spawn(RelayConfig::default());
//! let (source, sink, peer) = memory::pair(16);
//! let session = relay.attach(source, sink)?;
//! let reason = session.wait().await;
//! ```

pub mod config;
pub mod connection;
pub mod hub;
pub mod message;
pub mod pump;
pub mod registry;
pub mod relay;
pub mod stats;

pub use config::{ControlReply, RelayConfig};
pub use connection::{CloseReason, Connection, ConnectionId, ConnectionState, EnqueueError};
pub use hub::{BroadcastHub, Broadcaster, FanOut, SubmitError};
pub use message::{Message, MessageKind};
pub use registry::{ConnectionRegistry, RegistryError};
pub use relay::{Relay, Session};
pub use stats::{RelayStats, RelayStatsSnapshot};
