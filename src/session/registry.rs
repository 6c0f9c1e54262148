//! Session Connection Registry
//!
//! A per-session map of connection id to live handle bundle. It is a plain
//! value: operations take it by value and hand back the updated map, and the
//! caller persists the result through its [`SessionStore`](super::SessionStore).

use std::collections::BTreeMap;

use tracing::debug;

use super::types::{HandleBundle, RegistryEntry};
use crate::store::types::{ConnectionId, UserId};

#[derive(Debug, Clone, Default)]
pub struct SessionConnections {
    entries: BTreeMap<ConnectionId, RegistryEntry>,
}

impl SessionConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `id`; the latest bundle wins
    #[must_use]
    pub fn add_or_replace(mut self, id: ConnectionId, bundle: HandleBundle) -> Self {
        let replaced = self
            .entries
            .insert(id, RegistryEntry::new(id, bundle))
            .is_some();
        debug!(
            "Registry {} connection {}",
            if replaced { "replaced" } else { "added" },
            id
        );
        self
    }

    /// Drop the entry for `id`. Absent ids are a no-op.
    #[must_use]
    pub fn remove(mut self, id: ConnectionId) -> Self {
        if self.entries.remove(&id).is_some() {
            debug!("Registry removed connection {}", id);
        }
        self
    }

    pub fn get(&self, id: ConnectionId) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The externally owned session value
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user: UserId,
    pub connections: SessionConnections,
}

impl UserSession {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            connections: SessionConnections::new(),
        }
    }
}
