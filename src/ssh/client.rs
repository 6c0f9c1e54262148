//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::config::{SshEndpoint, TunnelAuth};
use super::error::SshError;
use super::keys::decode_private_key;
use crate::config::{CoreSettings, HostKeyPolicy};

/// Connection knobs taken from [`CoreSettings`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub host_key_policy: HostKeyPolicy,
}

impl From<&CoreSettings> for ClientOptions {
    fn from(settings: &CoreSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            keepalive_interval: settings.keepalive_interval(),
            host_key_policy: settings.host_key_policy.clone(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&CoreSettings::default())
    }
}

pub struct SshClient {
    endpoint: SshEndpoint,
    options: ClientOptions,
}

impl SshClient {
    pub fn new(endpoint: SshEndpoint, options: ClientOptions) -> Self {
        Self { endpoint, options }
    }

    /// Connect and authenticate, bounded by the connect timeout.
    /// On any failure the transport is already gone when this returns.
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let timeout = self.options.connect_timeout;
        let addr = self.endpoint.address();

        tokio::time::timeout(timeout, self.establish())
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "Connection to {} timed out after {}s",
                    addr,
                    timeout.as_secs()
                ))
            })?
    }

    async fn establish(self) -> Result<Handle<ClientHandler>, SshError> {
        let endpoint = &self.endpoint;
        info!("Connecting to SSH server at {}", endpoint.address());

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: self.options.keepalive_interval,
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            endpoint.host.clone(),
            endpoint.port,
            self.options.host_key_policy.clone(),
        );

        let mut handle = client::connect(
            Arc::new(ssh_config),
            (endpoint.host.as_str(), endpoint.port),
            handler,
        )
        .await
        .map_err(|e| match e {
            rejected @ SshError::HostKeyRejected { .. } => rejected,
            other => SshError::ConnectionFailed(other.to_string()),
        })?;

        debug!("SSH handshake completed");

        match authenticate(&mut handle, endpoint).await {
            Ok(()) => {
                info!(
                    "SSH authentication successful for {}@{} ({})",
                    endpoint.username,
                    endpoint.address(),
                    endpoint.auth.method_name()
                );
                Ok(handle)
            }
            Err(e) => {
                let _ = handle
                    .disconnect(russh::Disconnect::ByApplication, "Authentication failed", "en")
                    .await;
                Err(e)
            }
        }
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    endpoint: &SshEndpoint,
) -> Result<(), SshError> {
    let authenticated = match &endpoint.auth {
        TunnelAuth::Password { password } => handle
            .authenticate_password(&endpoint.username, password.expose())
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
        TunnelAuth::Key {
            private_key,
            passphrase,
        } => {
            let key = decode_private_key(
                private_key.expose(),
                passphrase.as_ref().map(|p| p.expose()),
            )?;
            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            handle
                .authenticate_publickey(&endpoint.username, key_with_hash)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
        }
    };

    if !authenticated.success() {
        return Err(SshError::AuthenticationFailed(
            "Authentication rejected by server".to_string(),
        ));
    }
    Ok(())
}

/// `SHA256:<unpadded base64>` fingerprint, as printed by OpenSSH
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    format!("SHA256:{}", BASE64.encode(hasher.finalize()).trim_end_matches('='))
}

/// Client handler for russh callbacks; applies the [`HostKeyPolicy`]
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self { host, port, policy }
    }

    fn is_pinned(pins: &[String], fingerprint: &str) -> bool {
        pins.iter().any(|pin| {
            let pin = pin.trim().trim_end_matches('=');
            pin.len() == fingerprint.len() && bool::from(pin.as_bytes().ct_eq(fingerprint.as_bytes()))
        })
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = fingerprint(server_public_key);

        match &self.policy {
            HostKeyPolicy::AcceptUnknown => {
                info!(
                    "Accepting host key for {}:{} (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                Ok(true)
            }
            HostKeyPolicy::Pinned { fingerprints } => {
                if Self::is_pinned(fingerprints, &fingerprint) {
                    info!("Host key verified for {}:{}", self.host, self.port);
                    Ok(true)
                } else {
                    warn!(
                        "Host key for {}:{} is not pinned (fingerprint: {}), rejecting",
                        self.host, self.port, fingerprint
                    );
                    Err(SshError::HostKeyRejected {
                        host: self.host.clone(),
                        port: self.port,
                        fingerprint,
                    })
                }
            }
        }
    }
}
