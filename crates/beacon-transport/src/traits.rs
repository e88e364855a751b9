//! Transport abstraction traits for Beacon.
//!
//! The hub never touches a socket directly. Each connection owns one sink
//! (driven by its write loop) and one stream (driven by its read loop).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound frame exceeded the configured limit.
    #[error("Frame size {size} exceeds limit {limit}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Outbound payload could not be carried by the transport.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// A frame read from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Application data (text or binary). No inbound protocol is defined,
    /// so the contents are only size-checked.
    Data(Bytes),
    /// A ping from the peer. Transports answer these themselves.
    Ping,
    /// A response to one of our pings.
    Pong,
}

/// The outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one pre-encoded event as a text frame.
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Send a liveness probe.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and shut the sink down.
    ///
    /// Closing an already-closed sink is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The inbound half of a connection.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;

    /// Remote address of the peer, if known.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
