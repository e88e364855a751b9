//! The fan-out hub.
//!
//! All registry mutations and deliveries travel over one ordered control
//! stream to a single [`Coordinator`] task. Producers never wait on the
//! coordinator, and the coordinator never waits on a connection: pushes onto
//! outboxes are `try_send`, and a full outbox simply loses that event.

use crate::connection::{ConnectionHandle, PushOutcome};
use crate::identity::{ConnectionId, ConnectionKey, Identity};
use crate::registry::Registry;
use beacon_protocol::{codec, Event};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// A request to deliver one event to every connection of some identities.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Target identities. Duplicates are allowed.
    pub targets: Vec<Identity>,
    /// The event to deliver.
    pub event: Event,
}

enum Command {
    Register(ConnectionHandle),
    Unregister(ConnectionKey),
    Deliver(DeliveryRequest),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    encode_failures: AtomicU64,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Identities with at least one live connection.
    pub online_identities: usize,
    /// Live connections.
    pub connections: usize,
    /// Connections registered since start.
    pub registrations: u64,
    /// Connections removed since start.
    pub unregistrations: u64,
    /// Events queued onto an outbox.
    pub events_delivered: u64,
    /// Events discarded because an outbox was full.
    pub events_dropped: u64,
    /// Deliveries abandoned because the event could not be encoded.
    pub encode_failures: u64,
}

/// Handle to the hub. Cheap to clone; every clone feeds the same coordinator.
#[derive(Clone)]
pub struct Hub {
    control: mpsc::UnboundedSender<Command>,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
}

impl Hub {
    /// Create a hub and the coordinator that must be run for it to make
    /// progress.
    #[must_use]
    pub fn new() -> (Self, Coordinator) {
        let (control, commands) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new());
        let counters = Arc::new(Counters::default());

        let hub = Self {
            control,
            registry: Arc::clone(&registry),
            counters: Arc::clone(&counters),
        };
        let coordinator = Coordinator {
            commands,
            registry,
            counters,
        };
        (hub, coordinator)
    }

    /// Create a hub and spawn its coordinator on the current runtime.
    ///
    /// The coordinator stops once every `Hub` clone has been dropped.
    #[must_use]
    pub fn spawn() -> Self {
        let (hub, coordinator) = Self::new();
        tokio::spawn(coordinator.run());
        hub
    }

    /// Make a connection a delivery target for its identity.
    pub fn register(&self, handle: ConnectionHandle) {
        self.submit(Command::Register(handle));
    }

    /// Remove a connection and close its outbox.
    ///
    /// Unregistering a connection that is already gone is harmless.
    pub fn unregister(&self, key: &ConnectionKey) {
        self.submit(Command::Unregister(key.clone()));
    }

    /// Deliver an event to every connection of every target identity.
    ///
    /// Returns immediately. Delivery is best effort: offline targets and
    /// full outboxes silently miss the event.
    pub fn deliver<I>(&self, targets: I, event: Event)
    where
        I: IntoIterator<Item = Identity>,
    {
        let targets: Vec<Identity> = targets.into_iter().collect();
        if targets.is_empty() {
            trace!(kind = %event.kind(), "Delivery without targets ignored");
            return;
        }
        self.submit(Command::Deliver(DeliveryRequest { targets, event }));
    }

    /// Check whether an identity has at least one live connection.
    #[must_use]
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.registry.is_online(identity)
    }

    /// Connections currently registered for an identity.
    #[must_use]
    pub fn connections_for(&self, identity: &Identity) -> Vec<ConnectionId> {
        self.registry.connections_for(identity)
    }

    /// Wait until the coordinator has processed every command submitted
    /// before this call.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Flush(tx));
        let _ = rx.await;
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            online_identities: self.registry.online_count(),
            connections: self.registry.connection_count(),
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            unregistrations: self.counters.unregistrations.load(Ordering::Relaxed),
            events_delivered: self.counters.delivered.load(Ordering::Relaxed),
            events_dropped: self.counters.dropped.load(Ordering::Relaxed),
            encode_failures: self.counters.encode_failures.load(Ordering::Relaxed),
        }
    }

    fn submit(&self, command: Command) {
        if self.control.send(command).is_err() {
            warn!("Hub coordinator is not running; command discarded");
        }
    }
}

/// The task that owns all registry mutation.
pub struct Coordinator {
    commands: mpsc::UnboundedReceiver<Command>,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
}

impl Coordinator {
    /// Process commands until every `Hub` handle is gone.
    pub async fn run(mut self) {
        info!("Hub coordinator started");

        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }

        info!("Hub coordinator stopped");
    }

    fn handle(&self, command: Command) {
        match command {
            Command::Register(handle) => {
                self.registry.add(handle);
                self.counters.registrations.fetch_add(1, Ordering::Relaxed);
            }
            Command::Unregister(key) => {
                // Dropping the handle closes the outbox.
                if self.registry.remove(&key).is_some() {
                    self.counters.unregistrations.fetch_add(1, Ordering::Relaxed);
                } else {
                    trace!(connection = %key, "Unregister for unknown connection");
                }
            }
            Command::Deliver(request) => self.deliver(&request),
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn deliver(&self, request: &DeliveryRequest) {
        let kind = request.event.kind();
        let payload = match codec::encode(&request.event) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.encode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %kind, error = %e, "Event could not be encoded; delivery skipped");
                return;
            }
        };

        let mut queued = 0u64;
        let mut dropped = 0u64;

        for identity in &request.targets {
            self.registry.for_each_connection(identity, |handle| {
                match handle.try_push(payload.clone()) {
                    PushOutcome::Queued => queued += 1,
                    PushOutcome::Full => {
                        dropped += 1;
                        trace!(connection = %handle.key(), kind = %kind, "Outbox full; event dropped");
                    }
                    PushOutcome::Closed => {
                        trace!(connection = %handle.key(), "Outbox closed; connection is shutting down");
                    }
                }
            });
        }

        self.counters.delivered.fetch_add(queued, Ordering::Relaxed);
        self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);

        debug!(
            kind = %kind,
            targets = request.targets.len(),
            queued,
            dropped,
            "Event fanned out"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{outbox, Outbox};
    use beacon_protocol::kinds;
    use serde_json::json;

    fn connect(hub: &Hub, identity: &Identity, capacity: usize) -> (ConnectionKey, Outbox) {
        let (handle, outbox) = outbox(ConnectionKey::new(identity.clone()), capacity);
        let key = handle.key().clone();
        hub.register(handle);
        (key, outbox)
    }

    fn drain(outbox: &mut Outbox) -> Vec<Event> {
        std::iter::from_fn(|| outbox.try_recv())
            .map(|frame| codec::decode(&frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_offline_identity() {
        let hub = Hub::spawn();
        let ghost = Identity::from("ghost");

        assert!(!hub.is_online(&ghost));
        hub.deliver([ghost.clone()], Event::signal(kinds::STATUS_UPDATE));
        hub.flush().await;

        let stats = hub.stats();
        assert_eq!(stats.events_delivered, 0);
        assert_eq!(stats.events_dropped, 0);
    }

    #[tokio::test]
    async fn test_register_unregister_visibility() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let (key, _outbox) = connect(&hub, &alice, 4);

        hub.flush().await;
        assert!(hub.is_online(&alice));
        assert_eq!(hub.connections_for(&alice), vec![key.id]);

        hub.unregister(&key);
        hub.flush().await;
        assert!(!hub.is_online(&alice));
        assert!(hub.connections_for(&alice).is_empty());
    }

    #[tokio::test]
    async fn test_deliver_to_every_connection_of_identity() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        let (_, mut laptop) = connect(&hub, &alice, 4);
        let (_, mut phone) = connect(&hub, &alice, 4);
        let (_, mut other) = connect(&hub, &bob, 4);

        let event = Event::new(kinds::FRIEND_REQUEST, json!({"from": "carol"}));
        hub.deliver([alice.clone()], event.clone());
        hub.flush().await;

        assert_eq!(drain(&mut laptop), vec![event.clone()]);
        assert_eq!(drain(&mut phone), vec![event]);
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_per_connection() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let (_, mut outbox) = connect(&hub, &alice, 16);

        for n in 0..10 {
            hub.deliver([alice.clone()], Event::new("seq", json!(n)));
        }
        hub.flush().await;

        let seen: Vec<_> = drain(&mut outbox).iter().map(|e| e.data().clone()).collect();
        let expected: Vec<_> = (0..10).map(|n| json!(n)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_full_outbox_drops_without_blocking() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        let (_, mut slow) = connect(&hub, &alice, 2);
        let (_, mut fast) = connect(&hub, &bob, 16);

        for n in 0..5 {
            hub.deliver([alice.clone(), bob.clone()], Event::new("seq", json!(n)));
        }
        // Completes even though alice's outbox saturated
        hub.flush().await;

        let slow_seen: Vec<_> = drain(&mut slow).iter().map(|e| e.data().clone()).collect();
        assert_eq!(slow_seen, vec![json!(0), json!(1)]);
        assert_eq!(drain(&mut fast).len(), 5);

        let stats = hub.stats();
        assert_eq!(stats.events_delivered, 7);
        assert_eq!(stats.events_dropped, 3);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_harmless() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let (key, mut outbox) = connect(&hub, &alice, 4);

        hub.unregister(&key);
        hub.unregister(&key);
        hub.flush().await;

        let stats = hub.stats();
        assert_eq!(stats.registrations, 1);
        assert_eq!(stats.unregistrations, 1);
        assert!(!hub.is_online(&alice));
        // Outbox closed by the first removal
        assert_eq!(outbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_unencodable_event_skipped() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let (_, mut outbox) = connect(&hub, &alice, 4);

        let huge = Event::new("huge", json!("x".repeat(codec::MAX_FRAME_SIZE)));
        hub.deliver([alice.clone()], huge);
        hub.deliver([alice.clone()], Event::signal("after"));
        hub.flush().await;

        let seen = drain(&mut outbox);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), "after");
        assert_eq!(hub.stats().encode_failures, 1);
    }

    #[tokio::test]
    async fn test_duplicate_targets_deliver_per_occurrence() {
        let hub = Hub::spawn();
        let alice = Identity::from("alice");
        let (_, mut outbox) = connect(&hub, &alice, 4);

        hub.deliver([alice.clone(), alice.clone()], Event::signal("twice"));
        hub.flush().await;

        assert_eq!(drain(&mut outbox).len(), 2);
    }

    #[tokio::test]
    async fn test_empty_targets_ignored() {
        let hub = Hub::spawn();
        hub.deliver(Vec::<Identity>::new(), Event::signal("nobody"));
        hub.flush().await;
        assert_eq!(hub.stats(), HubStats::default());
    }

    #[tokio::test]
    async fn test_manual_coordinator() {
        let (hub, coordinator) = Hub::new();
        let alice = Identity::from("alice");
        let (_, _outbox) = connect(&hub, &alice, 4);

        // Nothing happens until the coordinator runs.
        assert!(!hub.is_online(&alice));

        tokio::spawn(coordinator.run());
        hub.flush().await;
        assert!(hub.is_online(&alice));
    }
}
