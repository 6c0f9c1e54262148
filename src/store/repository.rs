//! Persistence seam for descriptors and groups
//!
//! The core needs create/read/update/delete by id and an owner-or-public
//! filter; anything that can provide those implements
//! [`ConnectionRepository`]. Two implementations ship with the crate:
//! [`MemoryRepository`] here and `RedbRepository` in `redb_repo`.

#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use thiserror::Error;

use super::types::{ConnectionDescriptor, ConnectionId, Group, GroupId, UserId};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for RepositoryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RepositoryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

/// Relational store used by the descriptor and group stores
pub trait ConnectionRepository: Send + Sync {
    /// Persist a new descriptor; the repository assigns `id`
    fn insert_connection(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, RepositoryError>;

    fn get_connection(&self, id: ConnectionId)
        -> Result<Option<ConnectionDescriptor>, RepositoryError>;

    /// Overwrite an existing descriptor (identity preserved)
    fn update_connection(&self, descriptor: &ConnectionDescriptor) -> Result<(), RepositoryError>;

    /// Delete a descriptor and its group memberships; `false` if absent
    fn delete_connection(&self, id: ConnectionId) -> Result<bool, RepositoryError>;

    /// Descriptors owned by `owner` plus every public descriptor, by id
    fn list_visible_connections(
        &self,
        owner: UserId,
    ) -> Result<Vec<ConnectionDescriptor>, RepositoryError>;

    fn insert_group(&self, owner: UserId, name: &str) -> Result<Group, RepositoryError>;

    fn get_group(&self, id: GroupId) -> Result<Option<Group>, RepositoryError>;

    fn update_group(&self, group: &Group) -> Result<(), RepositoryError>;

    /// Delete a group and its memberships; `false` if absent
    fn delete_group(&self, id: GroupId) -> Result<bool, RepositoryError>;

    fn list_groups(&self, owner: UserId) -> Result<Vec<Group>, RepositoryError>;

    /// `false` if the membership already existed
    fn add_member(&self, group: GroupId, connection: ConnectionId)
        -> Result<bool, RepositoryError>;

    /// `false` if there was no such membership
    fn remove_member(
        &self,
        group: GroupId,
        connection: ConnectionId,
    ) -> Result<bool, RepositoryError>;

    fn group_members(&self, group: GroupId) -> Result<Vec<ConnectionId>, RepositoryError>;
}

#[derive(Default)]
struct MemoryState {
    connections: BTreeMap<ConnectionId, ConnectionDescriptor>,
    groups: BTreeMap<GroupId, Group>,
    members: BTreeSet<(GroupId, ConnectionId)>,
    next_id: i64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process repository, used for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRepository for MemoryRepository {
    fn insert_connection(
        &self,
        mut descriptor: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, RepositoryError> {
        let mut state = self.state.write();
        descriptor.id = ConnectionId(state.allocate_id());
        state.connections.insert(descriptor.id, descriptor.clone());
        Ok(descriptor)
    }

    fn get_connection(
        &self,
        id: ConnectionId,
    ) -> Result<Option<ConnectionDescriptor>, RepositoryError> {
        Ok(self.state.read().connections.get(&id).cloned())
    }

    fn update_connection(&self, descriptor: &ConnectionDescriptor) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        match state.connections.get_mut(&descriptor.id) {
            Some(slot) => {
                *slot = descriptor.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "connection {}",
                descriptor.id
            ))),
        }
    }

    fn delete_connection(&self, id: ConnectionId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        state.members.retain(|(_, conn)| *conn != id);
        Ok(state.connections.remove(&id).is_some())
    }

    fn list_visible_connections(
        &self,
        owner: UserId,
    ) -> Result<Vec<ConnectionDescriptor>, RepositoryError> {
        Ok(self
            .state
            .read()
            .connections
            .values()
            .filter(|c| c.owner == owner || c.public)
            .cloned()
            .collect())
    }

    fn insert_group(&self, owner: UserId, name: &str) -> Result<Group, RepositoryError> {
        let mut state = self.state.write();
        let group = Group {
            id: GroupId(state.allocate_id()),
            owner,
            name: name.to_string(),
        };
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    fn get_group(&self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        Ok(self.state.read().groups.get(&id).cloned())
    }

    fn update_group(&self, group: &Group) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        match state.groups.get_mut(&group.id) {
            Some(slot) => {
                *slot = group.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("group {}", group.id))),
        }
    }

    fn delete_group(&self, id: GroupId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        state.members.retain(|(group, _)| *group != id);
        Ok(state.groups.remove(&id).is_some())
    }

    fn list_groups(&self, owner: UserId) -> Result<Vec<Group>, RepositoryError> {
        Ok(self
            .state
            .read()
            .groups
            .values()
            .filter(|g| g.owner == owner)
            .cloned()
            .collect())
    }

    fn add_member(
        &self,
        group: GroupId,
        connection: ConnectionId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.state.write().members.insert((group, connection)))
    }

    fn remove_member(
        &self,
        group: GroupId,
        connection: ConnectionId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.state.write().members.remove(&(group, connection)))
    }

    fn group_members(&self, group: GroupId) -> Result<Vec<ConnectionId>, RepositoryError> {
        Ok(self
            .state
            .read()
            .members
            .iter()
            .filter(|(g, _)| *g == group)
            .map(|(_, c)| *c)
            .collect())
    }
}
