//! Crate-level error taxonomy
//!
//! Component errors fold into [`CoreError`]; the command layer turns any of
//! them into a `{ message, is_error }` reply.

use thiserror::Error;

use crate::config::StorageError;
use crate::probe::ProbeError;
use crate::store::RepositoryError;
use crate::tunnel::TunnelError;
use crate::vault::CryptoError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("This {0} does not belong to you.")]
    Ownership(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Storage error: {0}")]
    Storage(RepositoryError),

    #[error(transparent)]
    Settings(#[from] StorageError),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }
}

impl From<RepositoryError> for CoreError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => CoreError::NotFound(what),
            other => CoreError::Storage(other),
        }
    }
}

impl serde::Serialize for CoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
