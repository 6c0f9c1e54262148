//! Registry entry types
//!
//! Entries hold decrypted tunnel settings for the life of the session. None
//! of these types implement `Serialize`; they never reach durable storage.

use std::sync::Arc;

use crate::probe::DataSource;
use crate::ssh::{SshEndpoint, TunnelAuth};
use crate::store::descriptors::ResolvedSecrets;
use crate::store::types::{ConnectionDescriptor, ConnectionId, PlainSecret, Technology, TunnelRecord};

/// Tunnel settings with secrets in plaintext
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelMetadata {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: PlainSecret,
    pub private_key: PlainSecret,
    pub passphrase: PlainSecret,
}

impl TunnelMetadata {
    pub fn from_record(record: &TunnelRecord, secrets: &ResolvedSecrets) -> Self {
        Self {
            enabled: record.enabled,
            host: record.host.clone(),
            port: record.port,
            user: record.user.clone(),
            password: secrets.tunnel_password.clone().unwrap_or_default(),
            private_key: secrets.private_key.clone().unwrap_or_default(),
            passphrase: secrets.passphrase.clone().unwrap_or_default(),
        }
    }

    /// SSH login for this tunnel; a private key, when present, wins
    pub fn endpoint(&self) -> SshEndpoint {
        SshEndpoint {
            host: self.host.trim().to_string(),
            port: self.port,
            username: self.user.trim().to_string(),
            auth: TunnelAuth::from_secrets(
                Some(self.password.clone()),
                Some(self.private_key.clone()),
                Some(self.passphrase.clone()),
            ),
        }
    }
}

/// What a successful save hands to the registry
#[derive(Debug, Clone)]
pub struct HandleBundle {
    pub technology: Technology,
    pub data_source: Arc<dyn DataSource>,
    pub tunnel: TunnelMetadata,
    pub alias: String,
    pub public: bool,
    /// No stored password; the client asks for one on open
    pub prompt_password: bool,
}

impl HandleBundle {
    pub fn new(
        descriptor: &ConnectionDescriptor,
        data_source: Arc<dyn DataSource>,
        secrets: &ResolvedSecrets,
    ) -> Self {
        Self {
            technology: descriptor.technology,
            data_source,
            tunnel: TunnelMetadata::from_record(&descriptor.tunnel, secrets),
            alias: descriptor.alias.clone(),
            public: descriptor.public,
            prompt_password: descriptor.prompt_password(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub connection_id: ConnectionId,
    pub technology: Technology,
    pub data_source: Arc<dyn DataSource>,
    pub tunnel: TunnelMetadata,
    pub alias: String,
    pub public: bool,
    pub prompt_password: bool,
}

impl RegistryEntry {
    pub fn new(connection_id: ConnectionId, bundle: HandleBundle) -> Self {
        Self {
            connection_id,
            technology: bundle.technology,
            data_source: bundle.data_source,
            tunnel: bundle.tunnel,
            alias: bundle.alias,
            public: bundle.public,
            prompt_password: bundle.prompt_password,
        }
    }
}
