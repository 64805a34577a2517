//! Relay configuration.

use relay_protocol::{CONTROL_PING, DEFAULT_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the ingress pump answers a client-side control message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlReply {
    /// Consume silently.
    None,
    /// Reply with an empty `pong`.
    #[default]
    Ack,
    /// Reply with a `pong` carrying the client's text back.
    Echo,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Capacity of the shared broadcast queue.
    pub broadcast_capacity: usize,
    /// Deadline for a single write.
    pub write_wait: Duration,
    /// Silence tolerated before a connection is presumed dead.
    pub pong_wait: Duration,
    /// Keepalive ping period. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Longest an ingress pump waits to hand a message to the hub.
    pub submit_timeout: Duration,
    /// Wire `type` of the client-side liveness message.
    pub control_type: String,
    /// Reply policy for control messages.
    pub control_reply: ControlReply,
    /// Whether a message is also delivered back to its sender.
    pub echo_to_sender: bool,
}

impl RelayConfig {
    /// Default keepalive window.
    pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

    /// Default write deadline.
    pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

    /// Ping period for a keepalive window: 90% of it.
    #[must_use]
    pub fn ping_period_for(pong_wait: Duration) -> Duration {
        pong_wait * 9 / 10
    }

    /// Set the keepalive window and derive the ping period from it.
    #[must_use]
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = Self::ping_period_for(pong_wait);
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_capacity: 256,
            broadcast_capacity: 1024,
            write_wait: Self::DEFAULT_WRITE_WAIT,
            pong_wait: Self::DEFAULT_PONG_WAIT,
            ping_period: Self::ping_period_for(Self::DEFAULT_PONG_WAIT),
            submit_timeout: Duration::from_secs(5),
            control_type: CONTROL_PING.to_string(),
            control_reply: ControlReply::Ack,
            echo_to_sender: true,
        }
    }
}
