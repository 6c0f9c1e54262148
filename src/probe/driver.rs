//! Data-source driver seam
//!
//! A driver turns connection parameters into a [`DataSource`] handle that can
//! run a minimal connect/handshake and be pointed at a different host/port
//! (a tunnel's loopback end).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::types::{ConnectionId, PlainSecret, Technology};
use crate::tunnel::RemoteTarget;

/// The only status message that counts as success
pub const CONNECTION_SUCCESSFUL: &str = "Connection successful.";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Driver(String),

    #[error("{0} connections have no network target to tunnel to")]
    NoNetworkTarget(Technology),

    #[error("Connection test timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection test aborted: {0}")]
    Aborted(String),
}

impl serde::Serialize for ProbeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Everything a driver needs to build a handle
#[derive(Debug, Clone)]
pub struct DriverParams {
    pub technology: Technology,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub password: PlainSecret,
    /// `None` for unsaved payloads
    pub connection_id: Option<ConnectionId>,
    pub alias: String,
    pub conn_string: String,
}

/// A live (or ready-to-connect) data-source handle
#[async_trait]
pub trait DataSource: Send + Sync + fmt::Debug {
    fn technology(&self) -> Technology;

    /// Where the server really is; `None` for file-based engines
    fn active_target(&self) -> Option<RemoteTarget>;

    /// Point subsequent connects at `host:port`
    fn redirect(&mut self, host: &str, port: u16);

    /// Minimal connect/handshake. Returns [`CONNECTION_SUCCESSFUL`] or a
    /// human-readable failure message.
    async fn test_connection(&self) -> String;
}

pub trait DataSourceDriver: Send + Sync {
    fn instantiate(&self, params: DriverParams) -> Result<Box<dyn DataSource>, ProbeError>;
}
