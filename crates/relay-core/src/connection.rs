//! Per-connection state shared between the pumps and the hub.

use crate::message::Message;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Identity of a registered connection.
///
/// `slot` indexes the registry's arena and `generation` distinguishes
/// successive occupants of that slot, so an id held by a torn-down
/// connection never matches the connection that reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    slot: u32,
    generation: u64,
}

impl ConnectionId {
    /// Create an id from its parts.
    #[must_use]
    pub const fn new(slot: u32, generation: u64) -> Self {
        Self { slot, generation }
    }

    /// Arena slot index.
    #[must_use]
    pub const fn slot(&self) -> u32 {
        self.slot
    }

    /// Occupant generation of the slot.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}.{}", self.slot, self.generation)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake done, not yet registered.
    Connecting = 0,
    /// Registered and receiving broadcasts.
    Active = 1,
    /// Removed from the registry, pumps shutting down.
    Closing = 2,
    /// Both pumps exited and the transport is released.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    /// The peer closed the connection or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Reading from the transport failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// An inbound frame exceeded the size limit.
    #[error("inbound frame of {0} bytes exceeds the size limit")]
    Oversized(usize),

    /// No liveness acknowledgment arrived within the keepalive window.
    #[error("keepalive deadline expired")]
    KeepaliveExpired,

    /// The broadcast hub did not accept a message in time.
    #[error("broadcast submission timed out")]
    SubmitTimeout,

    /// The broadcast hub has stopped.
    #[error("broadcast hub unavailable")]
    HubUnavailable,

    /// Writing to the transport failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A write did not complete within the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,

    /// The outbound queue was closed.
    #[error("outbound queue closed")]
    QueueClosed,

    /// The hub evicted the connection because its outbound queue was full.
    #[error("evicted as a slow consumer")]
    Evicted,
}

impl CloseReason {
    /// Whether this is an orderly shutdown rather than a failure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::PeerClosed | Self::QueueClosed)
    }

    /// Short stable name, suitable as a metrics label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadFailed(_) => "read_failed",
            Self::Oversized(_) => "oversized",
            Self::KeepaliveExpired => "keepalive_expired",
            Self::SubmitTimeout => "submit_timeout",
            Self::HubUnavailable => "hub_unavailable",
            Self::WriteFailed(_) => "write_failed",
            Self::WriteTimeout => "write_timeout",
            Self::QueueClosed => "queue_closed",
            Self::Evicted => "evicted",
        }
    }
}

/// Failure to place a message on an outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The queue has been closed.
    #[error("outbound queue closed")]
    Closed,
}

/// An active bidirectional channel to one peer.
///
/// The connection owns the producer side of its outbound queue. The single
/// consumer is the connection's egress pump.
pub struct Connection {
    id: OnceLock<ConnectionId>,
    state: AtomicU8,
    outbound: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    shutdown: CancellationToken,
    close_reason: OnceLock<CloseReason>,
    remote_addr: Option<String>,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection in the `Connecting` state together with the
    /// receiving end of its outbound queue.
    #[must_use]
    pub fn new(
        capacity: usize,
        remote_addr: Option<String>,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: OnceLock::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound: Mutex::new(Some(tx)),
            shutdown: CancellationToken::new(),
            close_reason: OnceLock::new(),
            remote_addr,
            connected_at: Instant::now(),
        });
        (conn, rx)
    }

    /// Registry id, once registered.
    #[must_use]
    pub fn id(&self) -> Option<ConnectionId> {
        self.id.get().copied()
    }

    pub(crate) fn assign_id(&self, id: ConnectionId) -> bool {
        self.id.set(id).is_ok()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Remote address reported by the transport.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Place a message on the outbound queue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] once the queue has been closed.
    pub fn try_enqueue(&self, message: Arc<Message>) -> Result<(), EnqueueError> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = outbound.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the connection: record `reason` if none is recorded yet, close
    /// the outbound queue and signal both pumps to stop.
    ///
    /// Idempotent. Returns `true` for the call that recorded the reason.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = self.close_reason.set(reason).is_ok();
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shutdown.cancel();
        first
    }

    /// Reason recorded by the first [`Connection::close`].
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().cloned()
    }

    /// Whether [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
