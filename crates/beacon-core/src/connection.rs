//! Connection lifecycle and read/write loops.
//!
//! A connection is split into two tasks:
//!
//! - the **write loop** drains the connection's outbox onto the transport and
//!   sends a ping whenever the idle timer fires;
//! - the **read loop** exists only to notice that the peer is gone: it
//!   enforces a read deadline (reset by pongs) and an inbound size cap.
//!
//! Whichever side notices a failure first ends the connection. Removal from
//! the hub happens exactly once, from a drop guard the connection holds from
//! `open` onward.
//! The hub closes the outbox on removal, which makes the write loop flush
//! what is queued, send a close frame, and exit.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_transport::{FrameSink, FrameStream, Inbound, TransportError};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::hub::Hub;
use crate::identity::{ConnectionKey, Identity};

/// Default number of queued events per connection.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of undelivered events queued for one connection.
    pub outbox_capacity: usize,
    /// Deadline for a single write (event, ping or close).
    pub write_timeout: Duration,
    /// Idle interval between pings.
    pub ping_interval: Duration,
    /// How long the peer may stay silent before it is considered gone.
    pub read_timeout: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            max_frame_size: 4096,
        }
    }
}

/// Result of a non-blocking push onto an outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The payload was queued.
    Queued,
    /// The outbox was full; the payload was discarded.
    Full,
    /// The write loop has already exited.
    Closed,
}

/// The hub's side of a connection: its key and the producer end of its
/// outbox. Dropping the handle closes the outbox.
#[derive(Debug)]
pub struct ConnectionHandle {
    key: ConnectionKey,
    outbox: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// The connection this handle feeds.
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Queue a payload without waiting.
    pub fn try_push(&self, payload: Bytes) -> PushOutcome {
        match self.outbox.try_send(payload) {
            Ok(()) => PushOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

/// The consumer end of a connection's outbox.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::Receiver<Bytes>,
}

impl Outbox {
    /// Wait for the next payload.
    ///
    /// Returns `None` once the outbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take the next payload if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Number of queued payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a bounded outbox for a connection.
#[must_use]
pub fn outbox(key: ConnectionKey, capacity: usize) -> (ConnectionHandle, Outbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConnectionHandle { key, outbox: tx }, Outbox { rx })
}

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Built, not yet handed to the hub.
    Connecting = 0,
    /// Registered with the hub; loops running.
    Registered = 1,
    /// A loop detected the end of the connection; cleanup in progress.
    Closing = 2,
    /// Cleanup finished. Terminal.
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared view of a connection's state.
#[derive(Debug, Clone)]
pub struct ConnectionStatus(Arc<AtomicU8>);

impl ConnectionStatus {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)))
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.0.store(ConnectionState::Closed as u8, Ordering::Release);
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// Nothing (not even a pong) arrived before the read deadline.
    ReadTimeout,
    /// Reading from the transport failed.
    ReadFailed(String),
    /// A write missed its deadline.
    WriteTimeout,
    /// Writing to the transport failed.
    WriteFailed(String),
    /// The hub removed the connection and closed its outbox.
    Unregistered,
}

/// A live connection bound to one identity.
pub struct Connection<S, R> {
    key: ConnectionKey,
    sink: S,
    stream: R,
    outbox: Outbox,
    config: ConnectionConfig,
    status: ConnectionStatus,
    guard: UnregisterGuard,
}

impl<S: FrameSink, R: FrameStream> Connection<S, R> {
    /// Build a connection for `identity` and register it with the hub.
    ///
    /// The hub owns the only producer handle from this point on, so the
    /// connection cannot be registered twice. Dropping the connection, with
    /// or without running it, unregisters it.
    pub fn open(identity: Identity, sink: S, stream: R, config: ConnectionConfig, hub: &Hub) -> Self {
        let key = ConnectionKey::new(identity);
        let (handle, outbox) = outbox(key.clone(), config.outbox_capacity);
        let status = ConnectionStatus::new();

        hub.register(handle);
        status.advance(ConnectionState::Connecting, ConnectionState::Registered);

        let guard = UnregisterGuard {
            hub: hub.clone(),
            key: key.clone(),
        };

        Self {
            key,
            sink,
            stream,
            outbox,
            config,
            status,
            guard,
        }
    }

    /// The connection's key.
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// A handle for observing the connection's state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    /// Run both loops until the connection ends.
    ///
    /// The write loop is spawned onto its own task; the read loop runs on
    /// the caller's task.
    pub async fn run(self) -> CloseReason {
        let Connection {
            key,
            sink,
            mut stream,
            outbox,
            config,
            status,
            guard,
        } = self;

        debug!(
            identity = %key.identity,
            connection = %key.id,
            remote = ?stream.remote_addr(),
            "Connection active"
        );

        let mut writer = tokio::spawn(write_loop(sink, outbox, config.clone()));

        let (reason, writer_done) = tokio::select! {
            reason = read_loop(&mut stream, &config) => (reason, false),
            joined = &mut writer => {
                let reason = joined.unwrap_or_else(|e| CloseReason::WriteFailed(e.to_string()));
                (reason, true)
            }
        };

        if status.advance(ConnectionState::Registered, ConnectionState::Closing) {
            debug!(
                identity = %key.identity,
                connection = %key.id,
                reason = ?reason,
                "Connection closing"
            );
        }

        drop(guard);
        drop(stream);

        if !writer_done {
            let _ = writer.await;
        }

        status.finish();
        debug!(identity = %key.identity, connection = %key.id, "Connection closed");

        reason
    }
}

/// Unregisters the connection when dropped, whether or not `run` was reached.
struct UnregisterGuard {
    hub: Hub,
    key: ConnectionKey,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.key);
    }
}

async fn read_loop<R: FrameStream>(stream: &mut R, config: &ConnectionConfig) -> CloseReason {
    let mut deadline = Instant::now() + config.read_timeout;

    loop {
        match timeout_at(deadline, stream.recv()).await {
            Err(_) => return CloseReason::ReadTimeout,
            Ok(Ok(Some(Inbound::Pong))) => {
                trace!("Pong received");
                deadline = Instant::now() + config.read_timeout;
            }
            Ok(Ok(Some(Inbound::Ping))) => {}
            Ok(Ok(Some(Inbound::Data(data)))) => {
                if data.len() > config.max_frame_size {
                    let err = TransportError::FrameTooLarge {
                        size: data.len(),
                        limit: config.max_frame_size,
                    };
                    return CloseReason::ReadFailed(err.to_string());
                }
                trace!(bytes = data.len(), "Ignoring inbound data");
            }
            Ok(Ok(None)) => return CloseReason::PeerClosed,
            Ok(Err(e)) => {
                warn!(error = %e, "Transport read error");
                return CloseReason::ReadFailed(e.to_string());
            }
        }
    }
}

async fn write_loop<S: FrameSink>(
    mut sink: S,
    mut outbox: Outbox,
    config: ConnectionConfig,
) -> CloseReason {
    let mut heartbeat = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;

            payload = outbox.recv() => match payload {
                Some(payload) => {
                    if let Err(reason) = with_deadline(config.write_timeout, sink.send_text(payload)).await {
                        break reason;
                    }
                }
                None => break CloseReason::Unregistered,
            },

            _ = heartbeat.tick() => {
                if let Err(reason) = with_deadline(config.write_timeout, sink.send_ping()).await {
                    break reason;
                }
            }
        }
    };

    if let Err(reason) = with_deadline(config.write_timeout, sink.close()).await {
        trace!(reason = ?reason, "Close frame not sent");
    }

    reason
}

async fn with_deadline<F>(limit: Duration, write: F) -> Result<(), CloseReason>
where
    F: Future<Output = Result<(), TransportError>>,
{
    match timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(error = %e, "Transport write error");
            Err(CloseReason::WriteFailed(e.to_string()))
        }
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}
