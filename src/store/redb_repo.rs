//! Durable repository using redb + MessagePack
//!
//! Database: connections.redb
//! Tables:
//!   - connections: id -> ConnectionDescriptor (MessagePack)
//!   - groups: id -> Group (MessagePack)
//!   - group_members: "group_id:connection_id" -> () marker
//!   - repo_metadata: "version" / "next_id" -> u32 / i64 (MessagePack)

#![allow(clippy::result_large_err)]

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, error, info, warn};

use super::repository::{ConnectionRepository, RepositoryError};
use super::types::{ConnectionDescriptor, ConnectionId, Group, GroupId, UserId};

/// Database version for migrations
pub const REPOSITORY_DB_VERSION: u32 = 1;

const CONNECTIONS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("connections");

const GROUPS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("groups");

/// Membership keys are "group_id:connection_id"; the value is unused
const MEMBERS_TABLE: TableDefinition<&str, u8> = TableDefinition::new("group_members");

const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("repo_metadata");

fn member_key(group: GroupId, connection: ConnectionId) -> String {
    format!("{}:{}", group.0, connection.0)
}

fn parse_member_key(key: &str) -> Option<(GroupId, ConnectionId)> {
    let (group, connection) = key.split_once(':')?;
    Some((
        GroupId(group.parse().ok()?),
        ConnectionId(connection.parse().ok()?),
    ))
}

/// Descriptor and group persistence on a single redb file
pub struct RedbRepository {
    db: Arc<Database>,
}

impl RedbRepository {
    /// Open (or create) the repository at the given path
    pub fn new(path: PathBuf) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::create(&path) {
            Ok(db) => {
                info!("Connection repository opened at {:?}", path);
                db
            }
            Err(e) => {
                warn!("Failed to open connection repository: {:?}, attempting recovery", e);

                let backup_path = path.with_extension("redb.backup");
                if let Err(e) = std::fs::rename(&path, &backup_path) {
                    error!("Failed to backup corrupted connection repository: {:?}", e);
                } else {
                    info!("Backed up corrupted connection repository to {:?}", backup_path);
                }

                Database::create(&path)?
            }
        };

        // Ciphertext only, but still nobody else's business
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            {
                warn!("Failed to set connection repository permissions: {}", e);
            }
        }

        let repo = Self { db: Arc::new(db) };
        repo.initialize()?;

        Ok(repo)
    }

    fn initialize(&self) -> Result<(), RepositoryError> {
        let write_txn = self.db.begin_write()?;

        {
            let _ = write_txn.open_table(CONNECTIONS_TABLE)?;
            let _ = write_txn.open_table(GROUPS_TABLE)?;
            let _ = write_txn.open_table(MEMBERS_TABLE)?;
            let mut meta = write_txn.open_table(METADATA_TABLE)?;

            let existing_version = meta
                .get("version")?
                .and_then(|v| rmp_serde::from_slice::<u32>(v.value()).ok());

            match existing_version {
                Some(version) if version > REPOSITORY_DB_VERSION => {
                    warn!(
                        "Connection repository version {} is newer than supported {}",
                        version, REPOSITORY_DB_VERSION
                    );
                }
                Some(version) if version == REPOSITORY_DB_VERSION => {}
                _ => {
                    let version_bytes = rmp_serde::to_vec(&REPOSITORY_DB_VERSION)?;
                    meta.insert("version", version_bytes.as_slice())?;
                }
            }
        }

        write_txn.commit()?;
        debug!("Connection repository initialized");
        Ok(())
    }

    /// Allocate the next id inside an open write transaction
    fn allocate_id(write_txn: &redb::WriteTransaction) -> Result<i64, RepositoryError> {
        let mut meta = write_txn.open_table(METADATA_TABLE)?;
        let current = meta
            .get("next_id")?
            .map(|v| rmp_serde::from_slice::<i64>(v.value()))
            .transpose()?
            .unwrap_or(0);
        let next = current + 1;
        let bytes = rmp_serde::to_vec(&next)?;
        meta.insert("next_id", bytes.as_slice())?;
        Ok(next)
    }
}

impl ConnectionRepository for RedbRepository {
    fn insert_connection(
        &self,
        mut descriptor: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, RepositoryError> {
        let write_txn = self.db.begin_write()?;
        {
            descriptor.id = ConnectionId(Self::allocate_id(&write_txn)?);
            let mut table = write_txn.open_table(CONNECTIONS_TABLE)?;
            let bytes = rmp_serde::to_vec_named(&descriptor)?;
            table.insert(descriptor.id.0, bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!("Inserted connection {}", descriptor.id);
        Ok(descriptor)
    }

    fn get_connection(
        &self,
        id: ConnectionId,
    ) -> Result<Option<ConnectionDescriptor>, RepositoryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS_TABLE)?;
        let result = match table.get(id.0)? {
            Some(bytes) => Some(rmp_serde::from_slice(bytes.value())?),
            None => None,
        };
        Ok(result)
    }

    fn update_connection(&self, descriptor: &ConnectionDescriptor) -> Result<(), RepositoryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONNECTIONS_TABLE)?;
            if table.get(descriptor.id.0)?.is_none() {
                return Err(RepositoryError::NotFound(format!(
                    "connection {}",
                    descriptor.id
                )));
            }
            let bytes = rmp_serde::to_vec_named(descriptor)?;
            table.insert(descriptor.id.0, bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!("Updated connection {}", descriptor.id);
        Ok(())
    }

    fn delete_connection(&self, id: ConnectionId) -> Result<bool, RepositoryError> {
        let write_txn = self.db.begin_write()?;
        let removed;
        {
            let mut table = write_txn.open_table(CONNECTIONS_TABLE)?;
            removed = table.remove(id.0)?.is_some();

            let mut members = write_txn.open_table(MEMBERS_TABLE)?;
            let stale: Vec<String> = members
                .iter()?
                .filter_map(|entry| entry.ok())
                .map(|(key, _)| key.value().to_string())
                .filter(|key| parse_member_key(key).is_some_and(|(_, conn)| conn == id))
                .collect();
            for key in stale {
                members.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;

        if removed {
            info!("Deleted connection {}", id);
        }
        Ok(removed)
    }

    fn list_visible_connections(
        &self,
        owner: UserId,
    ) -> Result<Vec<ConnectionDescriptor>, RepositoryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS_TABLE)?;

        let mut visible = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let descriptor: ConnectionDescriptor = rmp_serde::from_slice(value.value())?;
            if descriptor.owner == owner || descriptor.public {
                visible.push(descriptor);
            }
        }

        Ok(visible)
    }

    fn insert_group(&self, owner: UserId, name: &str) -> Result<Group, RepositoryError> {
        let write_txn = self.db.begin_write()?;
        let group;
        {
            group = Group {
                id: GroupId(Self::allocate_id(&write_txn)?),
                owner,
                name: name.to_string(),
            };
            let mut table = write_txn.open_table(GROUPS_TABLE)?;
            let bytes = rmp_serde::to_vec_named(&group)?;
            table.insert(group.id.0, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(group)
    }

    fn get_group(&self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GROUPS_TABLE)?;
        let result = match table.get(id.0)? {
            Some(bytes) => Some(rmp_serde::from_slice(bytes.value())?),
            None => None,
        };
        Ok(result)
    }

    fn update_group(&self, group: &Group) -> Result<(), RepositoryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GROUPS_TABLE)?;
            if table.get(group.id.0)?.is_none() {
                return Err(RepositoryError::NotFound(format!("group {}", group.id)));
            }
            let bytes = rmp_serde::to_vec_named(group)?;
            table.insert(group.id.0, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_group(&self, id: GroupId) -> Result<bool, RepositoryError> {
        let write_txn = self.db.begin_write()?;
        let removed;
        {
            let mut table = write_txn.open_table(GROUPS_TABLE)?;
            removed = table.remove(id.0)?.is_some();

            let mut members = write_txn.open_table(MEMBERS_TABLE)?;
            let prefix = format!("{}:", id.0);
            let stale: Vec<String> = members
                .iter()?
                .filter_map(|entry| entry.ok())
                .map(|(key, _)| key.value().to_string())
                .filter(|key| key.starts_with(&prefix))
                .collect();
            for key in stale {
                members.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    fn list_groups(&self, owner: UserId) -> Result<Vec<Group>, RepositoryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GROUPS_TABLE)?;

        let mut groups = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let group: Group = rmp_serde::from_slice(value.value())?;
            if group.owner == owner {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    fn add_member(
        &self,
        group: GroupId,
        connection: ConnectionId,
    ) -> Result<bool, RepositoryError> {
        let write_txn = self.db.begin_write()?;
        let inserted;
        {
            let mut members = write_txn.open_table(MEMBERS_TABLE)?;
            inserted = members
                .insert(member_key(group, connection).as_str(), 1u8)?
                .is_none();
        }
        write_txn.commit()?;
        Ok(inserted)
    }

    fn remove_member(
        &self,
        group: GroupId,
        connection: ConnectionId,
    ) -> Result<bool, RepositoryError> {
        let write_txn = self.db.begin_write()?;
        let removed;
        {
            let mut members = write_txn.open_table(MEMBERS_TABLE)?;
            removed = members
                .remove(member_key(group, connection).as_str())?
                .is_some();
        }
        write_txn.commit()?;
        Ok(removed)
    }

    fn group_members(&self, group: GroupId) -> Result<Vec<ConnectionId>, RepositoryError> {
        let read_txn = self.db.begin_read()?;
        let members = read_txn.open_table(MEMBERS_TABLE)?;

        let mut connections = Vec::new();
        for result in members.iter()? {
            let (key, _) = result?;
            if let Some((g, c)) = parse_member_key(key.value()) {
                if g == group {
                    connections.push(c);
                }
            }
        }
        connections.sort();
        Ok(connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{SealedSecret, Technology, TunnelRecord};
    use chrono::Utc;
    use tempfile::tempdir;

    fn descriptor(owner: i64, public: bool) -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: ConnectionId(0),
            owner: UserId(owner),
            technology: Technology::Postgresql,
            alias: "app".into(),
            host: "db1".into(),
            port: Some(5432),
            database: "app".into(),
            username: "alice".into(),
            password: SealedSecret::from_ciphertext("AQID"),
            conn_string: String::new(),
            public,
            tunnel: TunnelRecord::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_connection_crud_persists() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("connections.redb");

        let id = {
            let repo = RedbRepository::new(path.clone()).unwrap();
            let saved = repo.insert_connection(descriptor(1, false)).unwrap();
            assert_eq!(saved.id, ConnectionId(1));

            let mut edited = saved.clone();
            edited.alias = "renamed".into();
            repo.update_connection(&edited).unwrap();
            saved.id
        };

        let repo = RedbRepository::new(path).unwrap();
        let loaded = repo.get_connection(id).unwrap().unwrap();
        assert_eq!(loaded.alias, "renamed");
        assert_eq!(loaded.password.as_ciphertext(), "AQID");

        assert!(repo.delete_connection(id).unwrap());
        assert!(repo.get_connection(id).unwrap().is_none());
        assert!(!repo.delete_connection(id).unwrap());
    }

    #[test]
    fn test_visibility_filter() {
        let temp = tempdir().unwrap();
        let repo = RedbRepository::new(temp.path().join("c.redb")).unwrap();

        repo.insert_connection(descriptor(1, false)).unwrap();
        repo.insert_connection(descriptor(2, false)).unwrap();
        repo.insert_connection(descriptor(2, true)).unwrap();

        let visible = repo.list_visible_connections(UserId(1)).unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|c| c.owner == UserId(1) || c.public));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let temp = tempdir().unwrap();
        let repo = RedbRepository::new(temp.path().join("c.redb")).unwrap();

        let mut ghost = descriptor(1, false);
        ghost.id = ConnectionId(99);
        assert!(matches!(
            repo.update_connection(&ghost),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_group_membership_cascades() {
        let temp = tempdir().unwrap();
        let repo = RedbRepository::new(temp.path().join("c.redb")).unwrap();

        let conn = repo.insert_connection(descriptor(1, false)).unwrap();
        let other = repo.insert_connection(descriptor(1, false)).unwrap();
        let group = repo.insert_group(UserId(1), "prod").unwrap();

        assert!(repo.add_member(group.id, conn.id).unwrap());
        assert!(!repo.add_member(group.id, conn.id).unwrap());
        assert!(repo.add_member(group.id, other.id).unwrap());
        assert_eq!(repo.group_members(group.id).unwrap(), vec![conn.id, other.id]);

        repo.delete_connection(conn.id).unwrap();
        assert_eq!(repo.group_members(group.id).unwrap(), vec![other.id]);

        repo.delete_group(group.id).unwrap();
        assert!(repo.group_members(group.id).unwrap().is_empty());
        assert!(repo.list_groups(UserId(1)).unwrap().is_empty());
    }
}
