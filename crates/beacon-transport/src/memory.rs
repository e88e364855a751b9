//! In-memory transport.
//!
//! [`pair`] returns the two connection halves plus a [`Peer`] that plays the
//! remote client: it observes everything written to the sink and can inject
//! inbound frames, errors, or a hang-up. The outbound side is bounded, so a
//! peer that stops reading makes writes block exactly like a stalled socket.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameStream, Inbound, TransportError};

/// A frame written by the local side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded event.
    Text(Bytes),
    /// A liveness probe.
    Ping,
    /// The close handshake.
    Close,
}

/// Create a connected in-memory transport.
///
/// `capacity` bounds the number of unread outbound frames before writes
/// start to block.
#[must_use]
pub fn pair(capacity: usize, max_frame_size: usize) -> (MemorySink, MemoryStream, Peer) {
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    (
        MemorySink {
            tx: out_tx,
            closed: false,
        },
        MemoryStream {
            rx: in_rx,
            max_frame_size,
        },
        Peer {
            outbound: out_rx,
            inbound: Some(in_tx),
        },
    )
}

/// Outbound half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::Sender<Outbound>,
    closed: bool,
}

impl MemorySink {
    async fn push(&mut self, frame: Outbound) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.push(Outbound::Text(payload)).await
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(Outbound::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        let result = self.push(Outbound::Close).await;
        self.closed = true;
        result
    }
}

/// Inbound half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Result<Inbound, TransportError>>,
    max_frame_size: usize,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(Inbound::Data(data))) if data.len() > self.max_frame_size => {
                Err(TransportError::FrameTooLarge {
                    size: data.len(),
                    limit: self.max_frame_size,
                })
            }
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// The remote end of an in-memory connection.
#[derive(Debug)]
pub struct Peer {
    outbound: mpsc::Receiver<Outbound>,
    inbound: Option<mpsc::UnboundedSender<Result<Inbound, TransportError>>>,
}

impl Peer {
    /// Wait for the next outbound frame.
    ///
    /// Returns `None` once the sink has been dropped.
    pub async fn next(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Wait for the next text frame, skipping pings.
    ///
    /// Returns `None` on close or once the sink has been dropped.
    pub async fn next_text(&mut self) -> Option<Bytes> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Text(payload) => return Some(payload),
                Outbound::Ping => continue,
                Outbound::Close => return None,
            }
        }
    }

    /// Answer a ping.
    pub fn send_pong(&self) {
        self.send(Ok(Inbound::Pong));
    }

    /// Send application data to the local side.
    pub fn send_data(&self, data: impl Into<Bytes>) {
        self.send(Ok(Inbound::Data(data.into())));
    }

    /// Make the local stream fail with `error`.
    pub fn send_error(&self, error: TransportError) {
        self.send(Err(error));
    }

    /// Close the inbound direction, as if the client went away.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    fn send(&self, item: Result<Inbound, TransportError>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(item);
        }
    }
}
