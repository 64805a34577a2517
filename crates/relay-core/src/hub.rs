//! Broadcast fan-out.
//!
//! Ingress pumps submit admitted messages through a [`Broadcaster`] into a
//! bounded queue. A single [`BroadcastHub`] drains that queue in arrival
//! order and copies each message onto every registered connection's
//! outbound queue without ever waiting on one of them. A connection whose
//! queue is full is evicted instead of slowing down the others.

use crate::connection::{CloseReason, ConnectionId, EnqueueError};
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use crate::stats::RelayStats;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Submission errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The hub did not accept the message within the timeout.
    #[error("Timed out submitting to the broadcast hub")]
    Timeout,

    /// The hub has stopped.
    #[error("Broadcast hub is not running")]
    Closed,
}

/// Create a hub and the handle used to submit messages to it.
#[must_use]
pub fn channel(
    capacity: usize,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    echo_to_sender: bool,
) -> (Broadcaster, BroadcastHub) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Broadcaster { tx },
        BroadcastHub {
            registry,
            queue: rx,
            stats,
            echo_to_sender,
        },
    )
}

/// Producer handle for the shared broadcast queue.
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::Sender<Arc<Message>>,
}

impl Broadcaster {
    /// Queue a message for fan-out, waiting at most `timeout` for room.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Timeout`] if the queue stayed full and
    /// [`SubmitError::Closed`] if the hub is gone.
    pub async fn submit(&self, message: Message, timeout: Duration) -> Result<(), SubmitError> {
        match tokio::time::timeout(timeout, self.tx.send(Arc::new(message))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SubmitError::Closed),
            Err(_) => Err(SubmitError::Timeout),
        }
    }

    /// Whether the hub has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections skipped because they sent the message.
    pub skipped: usize,
    /// Connections evicted during this pass.
    pub evicted: usize,
}

/// The single consumer of the broadcast queue.
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    queue: mpsc::Receiver<Arc<Message>>,
    stats: Arc<RelayStats>,
    echo_to_sender: bool,
}

impl BroadcastHub {
    /// Drain the broadcast queue until every [`Broadcaster`] is dropped.
    pub async fn run(mut self) {
        info!("Broadcast hub started");
        while let Some(message) = self.queue.recv().await {
            self.fan_out(&message);
        }
        info!("Broadcast hub stopped");
    }

    /// Queue `message` on every registered connection, evicting those
    /// whose outbound queue is full.
    pub fn fan_out(&self, message: &Arc<Message>) -> FanOut {
        let mut report = FanOut::default();
        let mut stalled: Vec<(ConnectionId, EnqueueError)> = Vec::new();

        self.registry.for_each_active(|conn| {
            let Some(id) = conn.id() else {
                return;
            };
            if !self.echo_to_sender && message.origin == Some(id) {
                report.skipped += 1;
                return;
            }
            match conn.try_enqueue(Arc::clone(message)) {
                Ok(()) => report.delivered += 1,
                Err(e) => stalled.push((id, e)),
            }
        });

        for (id, cause) in stalled {
            // The connection may have torn itself down since the pass.
            let Some(conn) = self.registry.unregister(id) else {
                continue;
            };
            match cause {
                EnqueueError::Full => {
                    warn!(connection = %id, "Evicting slow consumer");
                    conn.close(CloseReason::Evicted);
                    report.evicted += 1;
                    RelayStats::incr(&self.stats.evictions);
                }
                // The consumer already exited and its own teardown records
                // why; only membership is dropped here.
                EnqueueError::Closed => {
                    debug!(connection = %id, "Dropping connection with closed outbound queue");
                }
            }
        }

        RelayStats::add(&self.stats.deliveries, report.delivered as u64);
        trace!(
            delivered = report.delivered,
            skipped = report.skipped,
            evicted = report.evicted,
            "Fan-out complete"
        );
        if report.evicted > 0 {
            debug!(evicted = report.evicted, "Fan-out evicted connections");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionState};
    use crate::message::MessageKind;
    use relay_protocol::WireMessage;

    fn hub(echo_to_sender: bool) -> (Arc<ConnectionRegistry>, Broadcaster, BroadcastHub) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, hub) = channel(
            16,
            Arc::clone(&registry),
            Arc::new(RelayStats::default()),
            echo_to_sender,
        );
        (registry, tx, hub)
    }

    fn chat(text: &str, origin: ConnectionId) -> Arc<Message> {
        Arc::new(Message::admit(
            WireMessage::new("chat", text, "tester"),
            MessageKind::Data,
            origin,
        ))
    }

    #[test]
    fn test_fan_out_to_all() {
        let (registry, _tx, hub) = hub(true);
        let mut queues = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = Connection::new(4, None);
            ids.push(registry.register(&conn).unwrap());
            queues.push(rx);
        }

        let report = hub.fan_out(&chat("hi", ids[0]));
        assert_eq!(
            report,
            FanOut {
                delivered: 3,
                skipped: 0,
                evicted: 0
            }
        );
        for rx in &mut queues {
            assert_eq!(rx.try_recv().unwrap().text, "hi");
        }
    }

    #[test]
    fn test_fan_out_skips_sender_when_configured() {
        let (registry, _tx, hub) = hub(false);
        let (a, mut rx_a) = Connection::new(4, None);
        let (b, mut rx_b) = Connection::new(4, None);
        let id_a = registry.register(&a).unwrap();
        registry.register(&b).unwrap();

        let report = hub.fan_out(&chat("hi", id_a));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().text, "hi");
    }

    #[test]
    fn test_full_queue_is_evicted_without_affecting_others() {
        let (registry, _tx, hub) = hub(true);
        let (slow, _slow_rx) = Connection::new(1, None);
        let (fast, mut fast_rx) = Connection::new(8, None);
        let slow_id = registry.register(&slow).unwrap();
        let fast_id = registry.register(&fast).unwrap();

        assert_eq!(hub.fan_out(&chat("1", fast_id)).delivered, 2);
        let report = hub.fan_out(&chat("2", fast_id));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);

        assert!(!registry.contains(slow_id));
        assert_eq!(slow.state(), ConnectionState::Closing);
        assert_eq!(slow.close_reason(), Some(CloseReason::Evicted));
        assert!(slow.is_closing());

        // Later broadcasts no longer target the evicted connection.
        let report = hub.fan_out(&chat("3", fast_id));
        assert_eq!(report, FanOut { delivered: 1, skipped: 0, evicted: 0 });

        let texts: Vec<_> = std::iter::from_fn(|| fast_rx.try_recv().ok())
            .map(|m| m.text.clone())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
        assert_eq!(hub.stats.evictions.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_closed_queue_is_not_an_eviction() {
        let (registry, _tx, hub) = hub(true);
        let (conn, rx) = Connection::new(1, None);
        let id = registry.register(&conn).unwrap();
        // The egress pump exited, but its teardown has not run yet.
        drop(rx);

        let report = hub.fan_out(&chat("x", id));
        assert_eq!(report, FanOut { delivered: 0, skipped: 0, evicted: 0 });
        assert!(!registry.contains(id));
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.close_reason().is_none());

        // The pump's own reason is the one recorded.
        assert!(conn.close(CloseReason::WriteFailed("broken pipe".into())));
        assert_eq!(
            conn.close_reason(),
            Some(CloseReason::WriteFailed("broken pipe".into()))
        );
        assert_eq!(hub.stats.evictions.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn test_eviction_after_self_teardown_is_noop() {
        let (registry, _tx, hub) = hub(true);
        let (conn, _rx) = Connection::new(1, None);
        let id = registry.register(&conn).unwrap();
        conn.try_enqueue(chat("fills", id)).unwrap();

        // The connection tears itself down before the hub looks again.
        assert!(registry.unregister(id).is_some());
        assert!(conn.close(CloseReason::PeerClosed));

        assert_eq!(hub.fan_out(&chat("x", id)).evicted, 0);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn test_run_preserves_admission_order() {
        let (registry, tx, hub) = hub(true);
        let mut queues = Vec::new();
        for _ in 0..4 {
            let (conn, rx) = Connection::new(64, None);
            registry.register(&conn).unwrap();
            queues.push(rx);
        }
        let origin = ConnectionId::new(99, 1);
        let task = tokio::spawn(hub.run());

        for i in 0..50 {
            let msg = Message::admit(
                WireMessage::new("chat", i.to_string(), "s"),
                MessageKind::Data,
                origin,
            );
            tx.submit(msg, Duration::from_secs(1)).await.unwrap();
        }

        for rx in &mut queues {
            for i in 0..50 {
                assert_eq!(rx.recv().await.unwrap().text, i.to_string());
            }
        }

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_times_out_when_hub_stalls() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _hub) = channel(1, registry, Arc::new(RelayStats::default()), true);
        let origin = ConnectionId::new(0, 1);
        let msg = || Message::admit(WireMessage::new("chat", "x", "s"), MessageKind::Data, origin);

        tx.submit(msg(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            tx.submit(msg(), Duration::from_secs(1)).await,
            Err(SubmitError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_submit_to_stopped_hub() {
        let (_registry, tx, hub) = hub(true);
        drop(hub);
        assert!(tx.is_closed());
        let msg = Message::admit(
            WireMessage::new("chat", "x", "s"),
            MessageKind::Data,
            ConnectionId::new(0, 1),
        );
        assert_eq!(
            tx.submit(msg, Duration::from_secs(1)).await,
            Err(SubmitError::Closed)
        );
    }
}
