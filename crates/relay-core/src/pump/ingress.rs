//! Ingress pump: transport → broadcast queue.

use crate::config::{ControlReply, RelayConfig};
use crate::connection::{CloseReason, Connection, ConnectionId};
use crate::hub::{Broadcaster, SubmitError};
use crate::message::{Message, MessageKind};
use crate::stats::RelayStats;
use relay_protocol::{codec, ProtocolError, WireMessage};
use std::sync::Arc;
use tenvis_relay_transport::{FrameSource, IncomingFrame, TransportError};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Reads frames from one connection and feeds the broadcast queue.
pub struct IngressPump<S> {
    source: S,
    conn: Arc<Connection>,
    id: ConnectionId,
    broadcaster: Broadcaster,
    config: Arc<RelayConfig>,
    stats: Arc<RelayStats>,
    deadline: Instant,
}

impl<S: FrameSource> IngressPump<S> {
    /// Create a pump for a registered connection.
    #[must_use]
    pub fn new(
        source: S,
        conn: Arc<Connection>,
        id: ConnectionId,
        broadcaster: Broadcaster,
        config: Arc<RelayConfig>,
        stats: Arc<RelayStats>,
    ) -> Self {
        let deadline = Instant::now() + config.pong_wait;
        Self {
            source,
            conn,
            id,
            broadcaster,
            config,
            stats,
            deadline,
        }
    }

    /// Run until the connection fails or is closed.
    ///
    /// Returns the failure that ended the loop, or `None` if the
    /// connection was closed from elsewhere.
    pub async fn run(mut self) -> Option<CloseReason> {
        let conn = Arc::clone(&self.conn);
        loop {
            let next = tokio::select! {
                biased;
                () = conn.closed() => return None,
                next = time::timeout_at(self.deadline, self.source.recv()) => next,
            };

            let frame = match next {
                Err(_) => return Some(CloseReason::KeepaliveExpired),
                Ok(Err(TransportError::MessageTooLarge(size))) => {
                    return Some(self.oversized(size));
                }
                Ok(Err(e)) => return Some(CloseReason::ReadFailed(e.to_string())),
                Ok(Ok(None)) => return Some(CloseReason::PeerClosed),
                Ok(Ok(Some(frame))) => frame,
            };

            let outcome = match frame {
                IncomingFrame::Text(_) | IncomingFrame::Binary(_) => {
                    self.handle_data(frame.data().unwrap_or_default()).await
                }
                IncomingFrame::Pong(_) => {
                    trace!(connection = %self.id, "Pong received");
                    self.extend_deadline();
                    Ok(())
                }
                IncomingFrame::Ping(_) => Ok(()),
                IncomingFrame::Close => Err(CloseReason::PeerClosed),
            };
            if let Err(reason) = outcome {
                return Some(reason);
            }
        }
    }

    fn extend_deadline(&mut self) {
        self.deadline = Instant::now() + self.config.pong_wait;
    }

    fn oversized(&self, size: usize) -> CloseReason {
        RelayStats::incr(&self.stats.oversized_frames);
        CloseReason::Oversized(size)
    }

    async fn handle_data(&mut self, data: &[u8]) -> Result<(), CloseReason> {
        let wire = match codec::decode(data, self.config.max_message_size) {
            Ok(wire) => wire,
            Err(ProtocolError::TooLarge { size, .. }) => return Err(self.oversized(size)),
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Skipping malformed message");
                RelayStats::incr(&self.stats.decode_errors);
                return Ok(());
            }
        };

        match MessageKind::classify(&wire.kind, &self.config.control_type) {
            MessageKind::Control => {
                self.handle_control(wire);
                Ok(())
            }
            MessageKind::Data => {
                let message = Message::admit(wire, MessageKind::Data, self.id);
                match self
                    .broadcaster
                    .submit(message, self.config.submit_timeout)
                    .await
                {
                    Ok(()) => {
                        RelayStats::incr(&self.stats.messages_admitted);
                        Ok(())
                    }
                    Err(SubmitError::Timeout) => Err(CloseReason::SubmitTimeout),
                    Err(SubmitError::Closed) => Err(CloseReason::HubUnavailable),
                }
            }
        }
    }

    fn handle_control(&mut self, wire: WireMessage) {
        RelayStats::incr(&self.stats.control_messages);
        self.extend_deadline();

        let reply = match self.config.control_reply {
            ControlReply::None => return,
            ControlReply::Ack => Message::pong(""),
            ControlReply::Echo => Message::pong(wire.text),
        };
        // Replies travel through the outbound queue; the egress pump is the
        // only writer.
        if let Err(e) = self.conn.try_enqueue(Arc::new(reply)) {
            debug!(connection = %self.id, error = %e, "Dropping control reply");
        }
    }
}
