//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon notification hub.
//!
//! A live connection is split into two halves that are driven by different
//! tasks:
//!
//! - [`FrameSink`] - outbound text frames, pings and the close handshake
//! - [`FrameStream`] - inbound frames, used for liveness only
//!
//! Implementations:
//!
//! - **WebSocket** - axum's upgraded socket (feature `websocket`)
//! - **Memory** - an in-process pair for tests and benchmarks
//!
//! ```rust,ignore
//! use beacon_transport::{FrameSink, FrameStream};
//!
//! async fn pump(mut sink: impl FrameSink, payload: bytes::Bytes) {
//!     if sink.send_text(payload).await.is_err() {
//!         let _ = sink.close().await;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameSink, FrameStream, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WsSink, WsStream};
