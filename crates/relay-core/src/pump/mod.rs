//! Per-connection read and write loops.
//!
//! Each connection gets one [`ingress`] pump that owns the transport's read
//! half and one [`egress`] pump that owns its write half. Neither touches
//! the other's half; they coordinate only through the connection's
//! outbound queue and shutdown signal.

pub mod egress;
pub mod ingress;

pub use egress::EgressPump;
pub use ingress::IngressPump;
