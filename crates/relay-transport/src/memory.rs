//! In-process transport.
//!
//! [`pair`] returns the two halves the core consumes plus a [`PeerEnd`]
//! that plays the remote client: it injects inbound frames and observes
//! what the server writes. Both directions are bounded, so a peer that
//! stops reading eventually blocks the sink, just like a stalled socket.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, IncomingFrame, TransportError};

/// A frame written by the server side of a memory connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingFrame {
    /// Text frame.
    Text(String),
    /// Transport-level ping.
    Ping,
    /// Close notification.
    Close,
}

/// Create a connected memory transport with `capacity` frames buffered in
/// each direction.
#[must_use]
pub fn pair(capacity: usize) -> (MemorySource, MemorySink, PeerEnd) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        MemorySource { rx: in_rx },
        MemorySink {
            tx: out_tx,
            closed: false,
        },
        PeerEnd {
            tx: in_tx,
            rx: out_rx,
        },
    )
}

/// Read half of a memory connection.
pub struct MemorySource {
    rx: mpsc::Receiver<Result<IncomingFrame, TransportError>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<IncomingFrame>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Write half of a memory connection.
pub struct MemorySink {
    tx: mpsc::Sender<OutgoingFrame>,
    closed: bool,
}

impl MemorySink {
    async fn push(&mut self, frame: OutgoingFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(OutgoingFrame::Text(text)).await
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(OutgoingFrame::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.push(OutgoingFrame::Close).await?;
        self.closed = true;
        Ok(())
    }
}

/// The remote side of a memory connection.
pub struct PeerEnd {
    tx: mpsc::Sender<Result<IncomingFrame, TransportError>>,
    rx: mpsc::Receiver<OutgoingFrame>,
}

impl PeerEnd {
    /// Deliver a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the server dropped
    /// its read half.
    pub async fn send(&self, frame: IncomingFrame) -> Result<(), TransportError> {
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Deliver a text frame to the server.
    ///
    /// # Errors
    ///
    /// See [`PeerEnd::send`].
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(IncomingFrame::Text(text.into())).await
    }

    /// Acknowledge a ping.
    ///
    /// # Errors
    ///
    /// See [`PeerEnd::send`].
    pub async fn pong(&self) -> Result<(), TransportError> {
        self.send(IncomingFrame::Pong(Bytes::new())).await
    }

    /// Make the server's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// See [`PeerEnd::send`].
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        self.tx
            .send(Err(error))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next frame written by the server.
    ///
    /// Returns `None` once the server dropped its write half.
    pub async fn recv(&mut self) -> Option<OutgoingFrame> {
        self.rx.recv().await
    }

    /// Take a frame written by the server without waiting.
    pub fn try_recv(&mut self) -> Option<OutgoingFrame> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next text frame, skipping pings.
    ///
    /// Returns `None` on close or when the server dropped its write half.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                OutgoingFrame::Text(text) => return Some(text),
                OutgoingFrame::Ping => continue,
                OutgoingFrame::Close => return None,
            }
        }
    }

    /// Whether the server has dropped its read half.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
