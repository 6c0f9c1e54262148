//! Connection descriptor data model
//!
//! Stored descriptors only ever hold secrets as [`SealedSecret`] blobs.
//! Plaintext arrives through [`ConnectionInput`] as [`PlainSecret`], where an
//! empty string means "leave the stored value unchanged".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use crate::vault::{self, CryptoError, UserKey};

/// Sentinel id meaning "create a new descriptor"
pub const NEW_CONNECTION_SENTINEL: i64 = -1;

/// Default SSH port for tunnels and terminal targets
pub const DEFAULT_SSH_PORT: u16 = 22;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of an authenticated user
    UserId
);
id_type!(
    /// Identity of a stored connection descriptor
    ConnectionId
);
id_type!(
    /// Identity of a connection group
    GroupId
);

/// Data source technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Technology {
    Postgresql,
    Mysql,
    Mariadb,
    Oracle,
    Mssql,
    Sqlite,
    /// Bare SSH target; the tunnel sub-record is the connection itself
    Terminal,
}

impl Technology {
    pub const ALL: [Technology; 7] = [
        Technology::Postgresql,
        Technology::Mysql,
        Technology::Mariadb,
        Technology::Oracle,
        Technology::Mssql,
        Technology::Sqlite,
        Technology::Terminal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Technology::Postgresql => "postgresql",
            Technology::Mysql => "mysql",
            Technology::Mariadb => "mariadb",
            Technology::Oracle => "oracle",
            Technology::Mssql => "mssql",
            Technology::Sqlite => "sqlite",
            Technology::Terminal => "terminal",
        }
    }

    /// Well-known server port, `None` for file-based engines
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Technology::Postgresql => Some(5432),
            Technology::Mysql | Technology::Mariadb => Some(3306),
            Technology::Oracle => Some(1521),
            Technology::Mssql => Some(1433),
            Technology::Sqlite => None,
            Technology::Terminal => Some(DEFAULT_SSH_PORT),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Technology::Terminal)
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Technology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Technology::Postgresql),
            "mysql" => Ok(Technology::Mysql),
            "mariadb" => Ok(Technology::Mariadb),
            "oracle" => Ok(Technology::Oracle),
            "mssql" | "sqlserver" => Ok(Technology::Mssql),
            "sqlite" => Ok(Technology::Sqlite),
            "terminal" => Ok(Technology::Terminal),
            other => Err(format!("Unknown technology: {}", other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Secrets
// ═══════════════════════════════════════════════════════════════════════════

/// An encrypted secret as stored. Empty means "no secret set".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn from_ciphertext(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    /// Encrypt a plaintext; an empty plaintext seals to "no secret"
    pub fn seal(plaintext: &str, key: &UserKey) -> Result<Self, CryptoError> {
        if plaintext.is_empty() {
            return Ok(Self::none());
        }
        Ok(Self(vault::encrypt(plaintext, key)?))
    }

    /// Decrypt; `None` when no secret is set
    pub fn open(&self, key: &UserKey) -> Result<Option<PlainSecret>, CryptoError> {
        if !self.is_set() {
            return Ok(None);
        }
        vault::decrypt(&self.0, key).map(|s| Some(PlainSecret::new(s)))
    }

    pub fn is_set(&self) -> bool {
        !self.0.trim().is_empty()
    }

    pub fn as_ciphertext(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            f.write_str("SealedSecret(<set>)")
        } else {
            f.write_str("SealedSecret(<empty>)")
        }
    }
}

/// A plaintext secret in flight. Zeroized on drop, never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlainSecret(String);

impl PlainSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whitespace-only submissions count as empty
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `Some(self)` unless empty
    pub fn non_empty(&self) -> Option<&PlainSecret> {
        (!self.is_empty()).then_some(self)
    }
}

impl From<&str> for PlainSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Drop for PlainSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for PlainSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("PlainSecret(<empty>)")
        } else {
            f.write_str("PlainSecret(<redacted>)")
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Stored records
// ═══════════════════════════════════════════════════════════════════════════

/// SSH tunnel sub-record of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Tunnel login password
    pub password: SealedSecret,
    /// Private key text (PEM/OpenSSH)
    pub private_key: SealedSecret,
    /// Passphrase protecting `private_key`; independent of `password`
    pub passphrase: SealedSecret,
}

impl Default for TunnelRecord {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            user: String::new(),
            password: SealedSecret::none(),
            private_key: SealedSecret::none(),
            passphrase: SealedSecret::none(),
        }
    }
}

/// A stored connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub id: ConnectionId,
    pub owner: UserId,
    pub technology: Technology,
    pub alias: String,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub password: SealedSecret,
    /// Driver connection string, stored verbatim
    pub conn_string: String,
    pub public: bool,
    pub tunnel: TunnelRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionDescriptor {
    /// Port to dial: explicit port, else the technology default
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.technology.default_port())
    }

    /// The registry asks for the password interactively when none is stored
    pub fn prompt_password(&self) -> bool {
        !self.password.is_set()
    }
}

/// A named set of connections owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub owner: UserId,
    pub name: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════════════════════════════════════

/// Whether a save creates a new descriptor or edits an existing one.
///
/// On the wire this is a plain integer id where `-1` means "create new".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveTarget {
    #[default]
    New,
    Existing(ConnectionId),
}

impl SaveTarget {
    pub fn existing(&self) -> Option<ConnectionId> {
        match self {
            SaveTarget::New => None,
            SaveTarget::Existing(id) => Some(*id),
        }
    }
}

impl From<i64> for SaveTarget {
    fn from(raw: i64) -> Self {
        if raw == NEW_CONNECTION_SENTINEL {
            SaveTarget::New
        } else {
            SaveTarget::Existing(ConnectionId(raw))
        }
    }
}

impl Serialize for SaveTarget {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SaveTarget::New => serializer.serialize_i64(NEW_CONNECTION_SENTINEL),
            SaveTarget::Existing(id) => serializer.serialize_i64(id.0),
        }
    }
}

impl<'de> Deserialize<'de> for SaveTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        i64::deserialize(deserializer).map(SaveTarget::from)
    }
}

/// Submitted tunnel settings. Empty secrets mean "unchanged".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelInput {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: PlainSecret,
    pub private_key: PlainSecret,
    pub passphrase: PlainSecret,
}

impl Default for TunnelInput {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            user: String::new(),
            password: PlainSecret::default(),
            private_key: PlainSecret::default(),
            passphrase: PlainSecret::default(),
        }
    }
}

/// Submitted connection settings for create/update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInput {
    #[serde(default)]
    pub id: SaveTarget,
    pub technology: Technology,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    /// Empty = unchanged on update, none on create
    #[serde(default)]
    pub password: PlainSecret,
    #[serde(default)]
    pub conn_string: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub tunnel: TunnelInput,
}

impl ConnectionInput {
    pub fn new(technology: Technology) -> Self {
        Self {
            id: SaveTarget::New,
            technology,
            alias: String::new(),
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: PlainSecret::default(),
            conn_string: String::new(),
            public: false,
            tunnel: TunnelInput::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Views
// ═══════════════════════════════════════════════════════════════════════════

/// Tunnel settings as shown to callers: secrets only as "is set" flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelSummary {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: bool,
    pub key: bool,
    pub passphrase: bool,
}

/// Descriptor as listed to a caller. Never carries ciphertext or plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub technology: Technology,
    pub alias: String,
    pub public: bool,
    pub is_mine: bool,
    /// Currently open in one of the caller's client tabs
    pub locked: bool,
    /// Database fields; absent for terminal targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSummary>,
    pub tunnel: TunnelSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSummary {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub conn_string: String,
    pub password: bool,
}

impl ConnectionSummary {
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        caller: UserId,
        open_ids: &[ConnectionId],
    ) -> Self {
        let tunnel = &descriptor.tunnel;
        let database = (!descriptor.technology.is_terminal()).then(|| DatabaseSummary {
            host: descriptor.host.clone(),
            port: descriptor.port,
            database: descriptor.database.clone(),
            user: descriptor.username.clone(),
            conn_string: descriptor.conn_string.clone(),
            password: descriptor.password.is_set(),
        });

        Self {
            id: descriptor.id,
            technology: descriptor.technology,
            alias: descriptor.alias.clone(),
            public: descriptor.public,
            is_mine: descriptor.owner == caller,
            locked: open_ids.contains(&descriptor.id),
            database,
            tunnel: TunnelSummary {
                enabled: tunnel.enabled,
                host: tunnel.host.clone(),
                port: tunnel.port,
                user: tunnel.user.clone(),
                password: tunnel.password.is_set(),
                key: tunnel.private_key.is_set(),
                passphrase: tunnel.passphrase.is_set(),
            },
        }
    }
}

/// A group with its member connection ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub connections: Vec<ConnectionId>,
}
