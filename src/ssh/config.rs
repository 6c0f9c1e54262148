//! SSH endpoint configuration

use serde::{Deserialize, Serialize};

use crate::store::types::{PlainSecret, DEFAULT_SSH_PORT};

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Where and how to log in over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub auth: TunnelAuth,
}

/// Authentication methods. Exactly one applies per login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelAuth {
    /// Password authentication
    Password { password: PlainSecret },

    /// Private key given as text
    Key {
        private_key: PlainSecret,
        /// Unlocks `private_key`; unrelated to any login password
        passphrase: Option<PlainSecret>,
    },
}

impl TunnelAuth {
    /// Pick the auth mode from resolved secrets: a non-empty key wins,
    /// otherwise password auth (possibly with an empty password).
    pub fn from_secrets(
        password: Option<PlainSecret>,
        private_key: Option<PlainSecret>,
        passphrase: Option<PlainSecret>,
    ) -> Self {
        match private_key.filter(|k| !k.is_empty()) {
            Some(private_key) => TunnelAuth::Key {
                private_key,
                passphrase: passphrase.filter(|p| !p.is_empty()),
            },
            None => TunnelAuth::Password {
                password: password.unwrap_or_default(),
            },
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            TunnelAuth::Password { .. } => "password",
            TunnelAuth::Key { .. } => "publickey",
        }
    }
}

impl SshEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
