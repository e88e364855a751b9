//! Codec for encoding and decoding event envelopes.
//!
//! Events travel as UTF-8 JSON, one envelope per transport frame, so there
//! is no length prefix: the transport already delimits messages.

use bytes::Bytes;
use thiserror::Error;

use crate::event::Event;

/// Maximum encoded event size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded event exceeds the maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode an event to its wire representation.
///
/// # Errors
///
/// Returns an error if encoding fails or the result is larger than
/// [`MAX_FRAME_SIZE`].
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event).map_err(ProtocolError::Encode)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an event from its wire representation.
///
/// # Errors
///
/// Returns an error if the data is too large or is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}
