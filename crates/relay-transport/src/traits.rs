//! Transport abstraction traits for Relay.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the core to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Inbound message exceeded the transport's size limit.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// A frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Transport-level ping. Answering it is the transport's job.
    Ping(Bytes),
    /// Transport-level pong, i.e. a liveness acknowledgment.
    Pong(Bytes),
    /// The peer started the closing handshake.
    Close,
}

impl IncomingFrame {
    /// Payload bytes of a data frame, `None` for control frames.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(data) => Some(data),
            _ => None,
        }
    }
}

/// The read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame from the peer.
    ///
    /// Returns `None` if the stream ended without a close frame.
    async fn recv(&mut self) -> Result<Option<IncomingFrame>, TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The write half of a connection.
///
/// Only one task may own a sink. Deadlines are applied by the caller.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a transport-level ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close notification and flush.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_data() {
        assert_eq!(IncomingFrame::Text("hi".into()).data(), Some(&b"hi"[..]));
        assert_eq!(
            IncomingFrame::Binary(Bytes::from_static(b"\x01")).data(),
            Some(&b"\x01"[..])
        );
        assert_eq!(IncomingFrame::Pong(Bytes::new()).data(), None);
        assert_eq!(IncomingFrame::Close.data(), None);
    }
}
