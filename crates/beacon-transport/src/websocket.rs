//! WebSocket transport implementation.
//!
//! Wraps the socket produced by axum's `WebSocketUpgrade` and splits it into
//! independently owned halves.

use std::borrow::Cow;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace};

use crate::traits::{FrameSink, FrameStream, Inbound, TransportError};

/// Split an upgraded socket into its sink and stream halves.
///
/// Inbound data frames larger than `max_frame_size` are reported as
/// [`TransportError::FrameTooLarge`].
#[must_use]
pub fn split(
    socket: WebSocket,
    max_frame_size: usize,
    remote_addr: Option<String>,
) -> (WsSink, WsStream) {
    let (sink, stream) = socket.split();
    (
        WsSink {
            inner: sink,
            closed: false,
        },
        WsStream {
            inner: stream,
            max_frame_size,
            remote_addr,
        },
    )
}

/// Outbound half of a WebSocket connection.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;

        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        trace!("Sending ping");
        self.inner
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(""),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}

/// Inbound half of a WebSocket connection.
pub struct WsStream {
    inner: SplitStream<WebSocket>,
    max_frame_size: usize,
    remote_addr: Option<String>,
}

impl WsStream {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameStream for WsStream {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.inner.next().await {
            Some(Ok(Message::Text(text))) => {
                self.check_size(text.len())?;
                Ok(Some(Inbound::Data(Bytes::from(text))))
            }
            Some(Ok(Message::Binary(data))) => {
                self.check_size(data.len())?;
                Ok(Some(Inbound::Data(Bytes::from(data))))
            }
            // The pong reply is queued by the socket itself.
            Some(Ok(Message::Ping(_))) => Ok(Some(Inbound::Ping)),
            Some(Ok(Message::Pong(_))) => Ok(Some(Inbound::Pong)),
            Some(Ok(Message::Close(frame))) => {
                debug!(reason = ?frame, "Received close frame");
                Ok(None)
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}
