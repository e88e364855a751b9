//! Identity to connection-set index.
//!
//! Every identity maps to the connections it currently has open. An entry
//! exists only while its set is non-empty. Updates to one identity's set are
//! atomic with respect to readers iterating that set.

use crate::connection::ConnectionHandle;
use crate::identity::{ConnectionId, ConnectionKey, Identity};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// Concurrency-safe registry of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    connections: DashMap<Identity, HashMap<ConnectionId, ConnectionHandle>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under its own identity.
    pub fn add(&self, handle: ConnectionHandle) {
        let key = handle.key().clone();
        let mut set = self.connections.entry(key.identity.clone()).or_default();
        set.insert(key.id, handle);

        debug!(
            identity = %key.identity,
            connection = %key.id,
            connections = set.len(),
            "Connection registered"
        );
    }

    /// Remove a connection.
    ///
    /// Returns the removed handle, or `None` if it was not registered.
    /// The identity's entry is dropped once its last connection is gone.
    pub fn remove(&self, key: &ConnectionKey) -> Option<ConnectionHandle> {
        let Entry::Occupied(mut entry) = self.connections.entry(key.identity.clone()) else {
            return None;
        };

        let removed = entry.get_mut().remove(&key.id);
        let remaining = entry.get().len();
        if remaining == 0 {
            entry.remove();
        }

        if removed.is_some() {
            debug!(
                identity = %key.identity,
                connection = %key.id,
                connections = remaining,
                "Connection removed"
            );
        }

        removed
    }

    /// Snapshot of the connections registered for an identity.
    #[must_use]
    pub fn connections_for(&self, identity: &Identity) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .get(identity)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Check whether an identity has at least one registered connection.
    #[must_use]
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.connections
            .get(identity)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Check whether a specific connection is registered.
    #[must_use]
    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections
            .get(&key.identity)
            .map(|set| set.contains_key(&key.id))
            .unwrap_or(false)
    }

    /// Visit every connection of an identity while holding its entry.
    ///
    /// `f` must not block and must not touch the registry.
    /// Returns the number of connections visited.
    pub fn for_each_connection(
        &self,
        identity: &Identity,
        mut f: impl FnMut(&ConnectionHandle),
    ) -> usize {
        match self.connections.get(identity) {
            Some(set) => {
                set.values().for_each(&mut f);
                set.len()
            }
            None => 0,
        }
    }

    /// Number of identities with at least one connection.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }

    /// Total number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|set| set.len()).sum()
    }
}
