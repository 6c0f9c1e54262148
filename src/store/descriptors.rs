//! Connection Descriptor Store
//!
//! Merge-patch create/update/delete of stored connection configurations.
//!
//! # Secret fields
//!
//! There are four sealed fields: the database password, the tunnel password,
//! the tunnel private key and the private key passphrase. Each follows its
//! own rule on update:
//!
//! - empty submitted value: the stored ciphertext is kept byte-for-byte
//! - non-empty submitted value: that value is sealed and replaces it
//!
//! No field is ever derived from another.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::repository::ConnectionRepository;
use super::types::{
    ConnectionDescriptor, ConnectionId, ConnectionInput, ConnectionSummary, PlainSecret,
    SaveTarget, SealedSecret, Technology, TunnelInput, TunnelRecord, UserId,
};
use crate::error::CoreError;
use crate::vault::{CryptoError, UserKey};

/// Plaintext secrets of a descriptor, opened with the owner's key
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub password: Option<PlainSecret>,
    pub tunnel_password: Option<PlainSecret>,
    pub private_key: Option<PlainSecret>,
    pub passphrase: Option<PlainSecret>,
}

/// Store for connection descriptors, backed by a [`ConnectionRepository`]
#[derive(Clone)]
pub struct DescriptorStore {
    repo: Arc<dyn ConnectionRepository>,
}

impl DescriptorStore {
    pub fn new(repo: Arc<dyn ConnectionRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn ConnectionRepository> {
        &self.repo
    }

    /// Create or update depending on the input's [`SaveTarget`]
    pub fn save(
        &self,
        caller: UserId,
        input: &ConnectionInput,
        key: &UserKey,
    ) -> Result<ConnectionDescriptor, CoreError> {
        match input.id {
            SaveTarget::New => self.create(caller, input, key),
            SaveTarget::Existing(id) => self.update(id, caller, input, key),
        }
    }

    /// Store a new descriptor owned by `owner`
    pub fn create(
        &self,
        owner: UserId,
        input: &ConnectionInput,
        key: &UserKey,
    ) -> Result<ConnectionDescriptor, CoreError> {
        validate(input)?;

        let now = Utc::now();
        let descriptor = ConnectionDescriptor {
            id: ConnectionId(0),
            owner,
            technology: input.technology,
            alias: input.alias.trim().to_string(),
            host: input.host.trim().to_string(),
            port: input.port,
            database: input.database.trim().to_string(),
            username: input.user.trim().to_string(),
            password: seal_submitted(&input.password, key)?,
            conn_string: input.conn_string.trim().to_string(),
            public: input.public,
            tunnel: TunnelRecord {
                enabled: input.tunnel.enabled,
                host: input.tunnel.host.trim().to_string(),
                port: input.tunnel.port,
                user: input.tunnel.user.trim().to_string(),
                password: seal_submitted(&input.tunnel.password, key)?,
                private_key: seal_submitted(&input.tunnel.private_key, key)?,
                passphrase: seal_submitted(&input.tunnel.passphrase, key)?,
            },
            created_at: now,
            updated_at: now,
        };

        let saved = self.repo.insert_connection(descriptor)?;
        info!(
            "Created {} connection {} for user {}",
            saved.technology, saved.id, owner
        );
        Ok(saved)
    }

    /// Apply a merge-patch to an existing descriptor owned by `caller`
    pub fn update(
        &self,
        id: ConnectionId,
        caller: UserId,
        input: &ConnectionInput,
        key: &UserKey,
    ) -> Result<ConnectionDescriptor, CoreError> {
        let mut descriptor = self.owned(id, caller)?;
        validate(input)?;

        descriptor.technology = input.technology;
        descriptor.alias = input.alias.trim().to_string();
        descriptor.host = input.host.trim().to_string();
        descriptor.port = input.port;
        descriptor.database = input.database.trim().to_string();
        descriptor.username = input.user.trim().to_string();
        descriptor.password = merge_secret(&descriptor.password, &input.password, key)?;
        descriptor.conn_string = input.conn_string.trim().to_string();
        descriptor.public = input.public;
        merge_tunnel(&mut descriptor.tunnel, &input.tunnel, key)?;
        descriptor.updated_at = Utc::now();

        self.repo.update_connection(&descriptor)?;
        info!("Updated connection {} for user {}", id, caller);
        Ok(descriptor)
    }

    /// Delete a descriptor owned by `caller`; group memberships go with it
    pub fn delete(&self, id: ConnectionId, caller: UserId) -> Result<(), CoreError> {
        self.owned(id, caller)?;
        if !self.repo.delete_connection(id)? {
            return Err(CoreError::NotFound(format!("connection {}", id)));
        }
        info!("Deleted connection {} for user {}", id, caller);
        Ok(())
    }

    /// Descriptors visible to `caller`: their own plus every public one.
    /// `open_ids` marks the ones currently open in the caller's client.
    pub fn list(
        &self,
        caller: UserId,
        open_ids: &[ConnectionId],
    ) -> Result<Vec<ConnectionSummary>, CoreError> {
        let mut descriptors = self.repo.list_visible_connections(caller)?;
        descriptors.sort_by_key(|d| d.id);
        debug!("Listing {} connections for user {}", descriptors.len(), caller);

        Ok(descriptors
            .iter()
            .map(|d| ConnectionSummary::from_descriptor(d, caller, open_ids))
            .collect())
    }

    pub fn get(&self, id: ConnectionId) -> Result<ConnectionDescriptor, CoreError> {
        self.repo
            .get_connection(id)?
            .ok_or_else(|| CoreError::NotFound(format!("connection {}", id)))
    }

    pub fn find(&self, id: ConnectionId) -> Result<Option<ConnectionDescriptor>, CoreError> {
        Ok(self.repo.get_connection(id)?)
    }

    /// Open every sealed field of a descriptor
    pub fn decrypt_secrets(
        descriptor: &ConnectionDescriptor,
        key: &UserKey,
    ) -> Result<ResolvedSecrets, CryptoError> {
        Ok(ResolvedSecrets {
            password: descriptor.password.open(key)?,
            tunnel_password: descriptor.tunnel.password.open(key)?,
            private_key: descriptor.tunnel.private_key.open(key)?,
            passphrase: descriptor.tunnel.passphrase.open(key)?,
        })
    }

    /// Fetch a descriptor and check write authority. `public` grants none.
    fn owned(&self, id: ConnectionId, caller: UserId) -> Result<ConnectionDescriptor, CoreError> {
        let descriptor = self.get(id)?;
        if descriptor.owner != caller {
            return Err(CoreError::Ownership("connection"));
        }
        Ok(descriptor)
    }
}

/// Required-field checks shared by create and update
fn validate(input: &ConnectionInput) -> Result<(), CoreError> {
    let tunnel = &input.tunnel;

    if input.technology.is_terminal() || tunnel.enabled {
        if tunnel.host.trim().is_empty() {
            return Err(CoreError::validation("SSH server can not be empty."));
        }
        if tunnel.user.trim().is_empty() {
            return Err(CoreError::validation("SSH user can not be empty."));
        }
        if tunnel.port == 0 {
            return Err(CoreError::validation("SSH port can not be zero."));
        }
    }

    if input.technology.is_terminal() || !input.conn_string.trim().is_empty() {
        return Ok(());
    }

    match input.technology {
        Technology::Sqlite if input.database.trim().is_empty() => {
            Err(CoreError::validation("Database file can not be empty."))
        }
        Technology::Sqlite => Ok(()),
        _ if input.host.trim().is_empty() => Err(CoreError::validation("Server can not be empty.")),
        _ => Ok(()),
    }
}

fn seal_submitted(submitted: &PlainSecret, key: &UserKey) -> Result<SealedSecret, CryptoError> {
    match submitted.non_empty() {
        Some(value) => SealedSecret::seal(value.expose(), key),
        None => Ok(SealedSecret::none()),
    }
}

fn merge_secret(
    stored: &SealedSecret,
    submitted: &PlainSecret,
    key: &UserKey,
) -> Result<SealedSecret, CryptoError> {
    match submitted.non_empty() {
        Some(value) => SealedSecret::seal(value.expose(), key),
        None => Ok(stored.clone()),
    }
}

fn merge_tunnel(
    stored: &mut TunnelRecord,
    submitted: &TunnelInput,
    key: &UserKey,
) -> Result<(), CryptoError> {
    stored.enabled = submitted.enabled;
    stored.host = submitted.host.trim().to_string();
    stored.port = submitted.port;
    stored.user = submitted.user.trim().to_string();
    stored.password = merge_secret(&stored.password, &submitted.password, key)?;
    stored.private_key = merge_secret(&stored.private_key, &submitted.private_key, key)?;
    stored.passphrase = merge_secret(&stored.passphrase, &submitted.passphrase, key)?;
    Ok(())
}
