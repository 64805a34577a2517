//! Lock-free relay counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the pumps and the hub.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub(crate) connections_accepted: AtomicU64,
    pub(crate) connections_closed: AtomicU64,
    pub(crate) messages_admitted: AtomicU64,
    pub(crate) control_messages: AtomicU64,
    pub(crate) deliveries: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) oversized_frames: AtomicU64,
}

impl RelayStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self, active_connections: usize) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            active_connections,
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            messages_admitted: self.messages_admitted.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    /// Connections currently registered.
    pub active_connections: usize,
    /// Connections registered since start.
    pub connections_accepted: u64,
    /// Connections fully closed since start.
    pub connections_closed: u64,
    /// Data messages accepted by the hub.
    pub messages_admitted: u64,
    /// Control messages handled locally.
    pub control_messages: u64,
    /// Successful enqueues onto outbound queues.
    pub deliveries: u64,
    /// Slow consumers evicted.
    pub evictions: u64,
    /// Malformed payloads skipped.
    pub decode_errors: u64,
    /// Connections closed for oversized frames.
    pub oversized_frames: u64,
}
