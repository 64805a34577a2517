//! Internal message types for Relay.

use crate::connection::ConnectionId;
use relay_protocol::{timestamp, WireMessage, CONTROL_PONG, SERVER_SENDER};

/// Whether a message is broadcast or handled by the receiving connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Rebroadcast to every connection.
    Data,
    /// Consumed by the connection that received it.
    Control,
}

impl MessageKind {
    /// Classify a wire `type` label against the configured control type.
    #[must_use]
    pub fn classify(label: &str, control_type: &str) -> Self {
        if label == control_type {
            Self::Control
        } else {
            Self::Data
        }
    }
}

/// A message admitted by an ingress pump, or generated by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Broadcast or local.
    pub kind: MessageKind,
    /// Original wire `type` label.
    pub label: String,
    /// Message body.
    pub text: String,
    /// Sender name supplied by the client.
    pub sender: String,
    /// Admission time in the wire timestamp format.
    pub timestamp: String,
    /// Connection the message arrived on. `None` for server messages.
    pub origin: Option<ConnectionId>,
}

impl Message {
    /// Admit a decoded wire message, replacing any client-supplied
    /// timestamp with the current time.
    #[must_use]
    pub fn admit(wire: WireMessage, kind: MessageKind, origin: ConnectionId) -> Self {
        Self {
            kind,
            label: wire.kind,
            text: wire.text,
            sender: wire.sender,
            timestamp: timestamp::now(),
            origin: Some(origin),
        }
    }

    /// A `pong` control reply from the server.
    #[must_use]
    pub fn pong(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Control,
            label: CONTROL_PONG.to_string(),
            text: text.into(),
            sender: SERVER_SENDER.to_string(),
            timestamp: timestamp::now(),
            origin: None,
        }
    }

    /// Convert to the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            kind: self.label.clone(),
            text: self.text.clone(),
            sender: self.sender.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}
