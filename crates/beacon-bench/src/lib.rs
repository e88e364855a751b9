//! Shared fixtures for the Beacon benchmarks.

use beacon_core::{outbox, ConnectionKey, Hub, Identity, Outbox};
use beacon_protocol::{kinds, Event};
use serde_json::json;

/// Register `identities` connections with `per_identity` connections each.
///
/// Returns the targets and every outbox, so the caller can drain them.
pub fn register_connections(
    hub: &Hub,
    identities: usize,
    per_identity: usize,
    capacity: usize,
) -> (Vec<Identity>, Vec<Outbox>) {
    let targets: Vec<Identity> = (0..identities)
        .map(|i| Identity::new(format!("user-{}", i)))
        .collect();

    let mut outboxes = Vec::with_capacity(identities * per_identity);
    for identity in &targets {
        for _ in 0..per_identity {
            let (handle, rx) = outbox(ConnectionKey::new(identity.clone()), capacity);
            hub.register(handle);
            outboxes.push(rx);
        }
    }

    (targets, outboxes)
}

/// Discard everything queued on `outboxes`.
pub fn drain(outboxes: &mut [Outbox]) -> usize {
    let mut drained = 0;
    for rx in outboxes {
        while rx.try_recv().is_some() {
            drained += 1;
        }
    }
    drained
}

/// A typical presence update.
#[must_use]
pub fn status_event() -> Event {
    Event::new(
        kinds::STATUS_UPDATE,
        json!({ "user_id": "user-0", "status": "awake", "last_seen": "2024-01-01T00:00:00Z" }),
    )
}
