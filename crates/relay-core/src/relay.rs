//! Relay entry point: owns the registry and hub, and attaches transports.

use crate::config::RelayConfig;
use crate::connection::{CloseReason, Connection, ConnectionId};
use crate::hub::{self, BroadcastHub, Broadcaster};
use crate::pump::{EgressPump, IngressPump};
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::stats::{RelayStats, RelayStatsSnapshot};
use std::sync::Arc;
use tenvis_relay_transport::{FrameSink, FrameSource};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Shared {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    config: Arc<RelayConfig>,
    stats: Arc<RelayStats>,
}

/// Handle to a running relay. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Shared>,
}

impl Relay {
    /// Create a relay and its hub. The hub must be driven with
    /// [`BroadcastHub::run`] for messages to flow.
    #[must_use]
    pub fn new(config: RelayConfig) -> (Self, BroadcastHub) {
        info!("Creating relay with config: {:?}", config);
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(RelayStats::default());
        let (broadcaster, hub) = hub::channel(
            config.broadcast_capacity,
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.echo_to_sender,
        );
        let relay = Self {
            inner: Arc::new(Shared {
                registry,
                broadcaster,
                config: Arc::new(config),
                stats,
            }),
        };
        (relay, hub)
    }

    /// Create a relay and spawn its hub on the current runtime.
    #[must_use]
    pub fn spawn(config: RelayConfig) -> Self {
        let (relay, hub) = Self::new(config);
        tokio::spawn(hub.run());
        relay
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// The relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.inner.stats.snapshot(self.inner.registry.len())
    }

    /// Register a freshly upgraded connection and start its pumps.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub fn attach<S, K>(&self, source: S, sink: K) -> Result<Session, RegistryError>
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let inner = &self.inner;
        let (conn, queue) = Connection::new(inner.config.outbound_capacity, source.remote_addr());
        let id = inner.registry.register(&conn)?;
        RelayStats::incr(&inner.stats.connections_accepted);
        info!(
            connection = %id,
            remote = conn.remote_addr().unwrap_or("unknown"),
            "Connection attached"
        );

        let ingress = IngressPump::new(
            source,
            Arc::clone(&conn),
            id,
            inner.broadcaster.clone(),
            Arc::clone(&inner.config),
            Arc::clone(&inner.stats),
        );
        let egress = EgressPump::new(sink, queue, conn.shutdown_token(), &inner.config);

        let relay = self.clone();
        let ingress_conn = Arc::clone(&conn);
        let ingress = tokio::spawn(async move {
            if let Some(reason) = ingress.run().await {
                relay.teardown(&ingress_conn, reason);
            }
        });

        let relay = self.clone();
        let egress_conn = Arc::clone(&conn);
        let egress = tokio::spawn(async move {
            if let Some(reason) = egress.run().await {
                relay.teardown(&egress_conn, reason);
            }
        });

        let relay = self.clone();
        let session_conn = Arc::clone(&conn);
        let task = tokio::spawn(async move {
            let (ingress, egress) = tokio::join!(ingress, egress);
            for result in [ingress, egress] {
                if let Err(e) = result {
                    warn!(connection = %id, error = %e, "Pump task failed");
                }
            }
            // A panicked pump may have skipped its teardown.
            relay.teardown(&session_conn, CloseReason::QueueClosed);
            session_conn.mark_closed();
            RelayStats::incr(&relay.inner.stats.connections_closed);
            let reason = session_conn
                .close_reason()
                .unwrap_or(CloseReason::PeerClosed);
            debug!(
                connection = %id,
                reason = %reason,
                age = ?session_conn.age(),
                "Connection closed"
            );
            reason
        });

        Ok(Session { id, conn, task })
    }

    /// Tear a connection down: unregister it, close its outbound queue and
    /// stop its pumps.
    ///
    /// Safe to call any number of times from any task; only the first
    /// reason is kept.
    pub fn teardown(&self, conn: &Connection, reason: CloseReason) {
        if let Some(id) = conn.id() {
            self.inner.registry.unregister(id);
        }
        let clean = reason.is_clean();
        let detail = reason.to_string();
        if conn.close(reason) {
            let id = conn.id().map(|id| id.to_string()).unwrap_or_default();
            if clean {
                debug!(connection = %id, reason = %detail, "Connection closing");
            } else {
                warn!(connection = %id, reason = %detail, "Connection closing");
            }
        }
    }
}

/// A connection attached to the relay.
pub struct Session {
    id: ConnectionId,
    conn: Arc<Connection>,
    task: JoinHandle<CloseReason>,
}

impl Session {
    /// Registry id of the connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The connection's shared state.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Wait until both pumps have exited and the transport is released.
    pub async fn wait(self) -> CloseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Session task failed");
                self.conn.close_reason().unwrap_or(CloseReason::PeerClosed)
            }
        }
    }
}
