//! # relay-protocol
//!
//! Wire format definitions for the Relay broadcast server.
//!
//! Every WebSocket frame carries exactly one JSON object:
//!
//! ```json
//! { "type": "chat", "text": "hi", "sender": "alice", "timestamp": "2024-05-01 12:00:00" }
//! ```
//!
//! The `timestamp` field is owned by the server. Whatever a client sends
//! there is overwritten when the message is admitted.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, WireMessage};
//!
//! let msg = WireMessage::new("chat", "hello", "alice");
//! let text = codec::encode(&msg).unwrap();
//! let decoded = codec::decode(text.as_bytes(), 512).unwrap();
//! assert_eq!(decoded.text, "hello");
//! ```

pub mod codec;
pub mod timestamp;
pub mod wire;

pub use codec::{decode, encode, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
pub use wire::{WireMessage, CONTROL_PING, CONTROL_PONG, SERVER_SENDER};
