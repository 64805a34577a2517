//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into the two connection halves.
//! The size limit is enforced by the upgrade itself; see
//! `WebSocketUpgrade::max_message_size`.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::traits::{FrameSink, FrameSource, IncomingFrame, TransportError};

/// Split an upgraded socket into its read and write halves.
#[must_use]
pub fn split(socket: WebSocket, remote_addr: Option<SocketAddr>) -> (WebSocketSource, WebSocketSink) {
    let (sink, stream) = socket.split();
    (
        WebSocketSource {
            stream,
            remote_addr,
        },
        WebSocketSink { sink },
    )
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
    remote_addr: Option<SocketAddr>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<IncomingFrame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(IncomingFrame::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(IncomingFrame::Binary(Bytes::from(data)))),
            Some(Ok(Message::Ping(data))) => {
                trace!("Received ping");
                Ok(Some(IncomingFrame::Ping(Bytes::from(data))))
            }
            Some(Ok(Message::Pong(data))) => Ok(Some(IncomingFrame::Pong(Bytes::from(data)))),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "Received close frame");
                Ok(Some(IncomingFrame::Close))
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
