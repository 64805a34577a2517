//! JSON codec for wire messages.
//!
//! One frame carries one JSON object. Size is checked before parsing so an
//! oversized frame is never handed to the JSON parser.

use thiserror::Error;

use crate::wire::WireMessage;

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Message size {size} exceeds maximum {max}")]
    TooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Payload is not a valid message object.
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

fn check_size(data: &[u8], max: usize) -> Result<(), ProtocolError> {
    if data.len() > max {
        return Err(ProtocolError::TooLarge {
            size: data.len(),
            max,
        });
    }
    Ok(())
}

/// Decode a message from a raw frame.
///
/// # Errors
///
/// Returns an error if the frame is larger than `max` or is not a JSON
/// message object.
pub fn decode(data: &[u8], max: usize) -> Result<WireMessage, ProtocolError> {
    check_size(data, max)?;
    Ok(serde_json::from_slice(data)?)
}

/// Encode a message as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(msg: &WireMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}
