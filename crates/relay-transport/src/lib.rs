//! # relay-transport
//!
//! Transport abstraction layer for the Relay broadcast server.
//!
//! A connection is handed to the core as two independent halves:
//!
//! - a [`FrameSource`] read by the connection's ingress pump,
//! - a [`FrameSink`] written only by the connection's egress pump.
//!
//! Splitting at this seam keeps exactly one writer per transport and lets
//! the pumps run without sharing a lock.
//!
//! Implementations:
//!
//! - **WebSocket** - axum's upgraded socket (feature `websocket`, default)
//! - **Memory** - an in-process pair for tests and benchmarks
//!
//! ```rust,ignore
//! use tenvis_relay_transport::{FrameSource, IncomingFrame};
//!
//! async fn drain(mut source: impl FrameSource) {
//!     while let Ok(Some(frame)) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameSink, FrameSource, IncomingFrame, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource};
