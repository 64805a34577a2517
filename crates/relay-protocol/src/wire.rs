//! The JSON message exchanged with clients.

use serde::{Deserialize, Serialize};

/// Default `type` of the client-side liveness message.
pub const CONTROL_PING: &str = "ping";

/// `type` of the server's reply to a liveness message.
pub const CONTROL_PONG: &str = "pong";

/// `sender` used for messages originated by the server itself.
pub const SERVER_SENDER: &str = "server";

/// A message as it appears on the wire.
///
/// Missing fields decode as empty strings and unknown fields are ignored,
/// so partially filled client payloads are still accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireMessage {
    /// Message type label, e.g. `"chat"` or `"ping"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body.
    pub text: String,
    /// Display name of the sender, as supplied by the client.
    pub sender: String,
    /// Admission time, set by the server.
    pub timestamp: String,
}

impl WireMessage {
    /// Create a message without a timestamp.
    #[must_use]
    pub fn new(kind: impl Into<String>, text: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
            sender: sender.into(),
            timestamp: String::new(),
        }
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_empty() {
        let msg: WireMessage = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(msg.text, "hi");
        assert!(msg.kind.is_empty());
        assert!(msg.sender.is_empty());
        assert!(msg.timestamp.is_empty());
    }

    #[test]
    fn test_type_field_is_renamed() {
        let msg = WireMessage::new("chat", "hi", "A");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let msg: WireMessage =
            serde_json::from_str(r#"{"type":"chat","room":"lobby","sender":"B"}"#).unwrap();
        assert_eq!(msg.kind, "chat");
        assert_eq!(msg.sender, "B");
    }
}
