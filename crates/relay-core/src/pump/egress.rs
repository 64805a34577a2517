//! Egress pump: outbound queue → transport.

use crate::config::RelayConfig;
use crate::connection::CloseReason;
use crate::message::Message;
use relay_protocol::codec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_transport::{FrameSink, TransportError};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Sole writer of one connection's transport.
pub struct EgressPump<K> {
    sink: K,
    queue: mpsc::Receiver<Arc<Message>>,
    shutdown: CancellationToken,
    write_wait: Duration,
    ping_period: Duration,
}

impl<K: FrameSink> EgressPump<K> {
    /// Create a pump draining `queue` into `sink`.
    #[must_use]
    pub fn new(
        sink: K,
        queue: mpsc::Receiver<Arc<Message>>,
        shutdown: CancellationToken,
        config: &RelayConfig,
    ) -> Self {
        Self {
            sink,
            queue,
            shutdown,
            write_wait: config.write_wait,
            ping_period: config.ping_period,
        }
    }

    /// Run until a write fails or the connection is closed.
    ///
    /// Returns the failure that ended the loop, or `None` if the
    /// connection was closed from elsewhere.
    pub async fn run(self) -> Option<CloseReason> {
        let Self {
            mut sink,
            mut queue,
            shutdown,
            write_wait,
            ping_period,
        } = self;

        let mut keepalive = time::interval_at(Instant::now() + ping_period, ping_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    finish(&mut sink, write_wait).await;
                    return None;
                }
                next = queue.recv() => {
                    let Some(message) = next else {
                        finish(&mut sink, write_wait).await;
                        return Some(CloseReason::QueueClosed);
                    };
                    let text = match codec::encode(&message.to_wire()) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode outbound message");
                            continue;
                        }
                    };
                    if let Err(reason) = with_deadline(write_wait, sink.send_text(text)).await {
                        return Some(reason);
                    }
                }
                _ = keepalive.tick() => {
                    trace!("Sending keepalive ping");
                    if let Err(reason) = with_deadline(write_wait, sink.send_ping()).await {
                        return Some(reason);
                    }
                }
            }
        }
    }
}

async fn with_deadline<F>(wait: Duration, write: F) -> Result<(), CloseReason>
where
    F: Future<Output = Result<(), TransportError>>,
{
    match time::timeout(wait, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CloseReason::WriteFailed(e.to_string())),
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}

async fn finish<K: FrameSink>(sink: &mut K, wait: Duration) {
    if let Err(reason) = with_deadline(wait, sink.close()).await {
        debug!(reason = %reason, "Close notification not delivered");
    }
}
