use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("SSH authentication failed: {0}")]
    Authentication(String),

    #[error("SSH connection failed: {0}")]
    Connection(String),

    #[error("Failed to bind local tunnel port: {0}")]
    Bind(String),

    #[error("Tunnel timed out: {0}")]
    Timeout(String),

    #[error("Invalid tunnel configuration: {0}")]
    InvalidConfig(String),
}

impl From<SshError> for TunnelError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AuthenticationFailed(_)
            | SshError::KeyError(_)
            | SshError::PassphraseRequired
            | SshError::InvalidPassphrase => TunnelError::Authentication(err.to_string()),
            SshError::Timeout(msg) => TunnelError::Timeout(msg),
            other => TunnelError::Connection(other.to_string()),
        }
    }
}

impl serde::Serialize for TunnelError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
