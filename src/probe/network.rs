//! Built-in data-source driver
//!
//! PostgreSQL, MySQL/MariaDB and SQLite are tested with a real, authenticated
//! sqlx connection built from the descriptor's host, port, database, user and
//! password. The server's own error text is passed through unchanged.
//!
//! sqlx has no Oracle or SQL Server backend, so for those engines the check
//! stops at a TCP connect: a reachable listener counts as success and the
//! credentials are never tried.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tokio::net::TcpStream;
use tracing::debug;

use super::driver::{DataSource, DataSourceDriver, DriverParams, ProbeError, CONNECTION_SUCCESSFUL};
use crate::store::types::{PlainSecret, Technology};
use crate::tunnel::RemoteTarget;

/// Default bound on a single connect attempt
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NetworkDriver {
    io_timeout: Duration,
}

impl NetworkDriver {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

impl Default for NetworkDriver {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT)
    }
}

impl DataSourceDriver for NetworkDriver {
    fn instantiate(&self, params: DriverParams) -> Result<Box<dyn DataSource>, ProbeError> {
        let parsed = parse_conn_string(&params.conn_string);

        let host = parsed
            .host
            .clone()
            .unwrap_or_else(|| params.host.trim().to_string());
        let port = parsed
            .port
            .or(params.port)
            .or_else(|| params.technology.default_port());
        let database = parsed
            .database
            .clone()
            .unwrap_or_else(|| params.database.trim().to_string());
        let user = parsed
            .user
            .clone()
            .unwrap_or_else(|| params.user.trim().to_string());
        // A resolved password beats one embedded in the connection string
        let password = match params.password.non_empty() {
            Some(password) => password.clone(),
            None => parsed.password.map(PlainSecret::new).unwrap_or_default(),
        };

        let active = match params.technology {
            Technology::Sqlite | Technology::Terminal => None,
            _ => port.map(|port| RemoteTarget::new(host.clone(), port)),
        };

        debug!(
            "Instantiated {} data source (target: {:?})",
            params.technology, active
        );

        Ok(Box::new(NetworkDataSource {
            technology: params.technology,
            connect_to: active.clone(),
            active,
            database,
            user,
            password,
            conn_string: params.conn_string,
            io_timeout: self.io_timeout,
        }))
    }
}

#[derive(Debug)]
pub struct NetworkDataSource {
    technology: Technology,
    /// True server location, unaffected by redirects
    active: Option<RemoteTarget>,
    /// Where the next connect goes
    connect_to: Option<RemoteTarget>,
    database: String,
    user: String,
    password: PlainSecret,
    conn_string: String,
    io_timeout: Duration,
}

impl NetworkDataSource {
    fn server(&self) -> Result<&RemoteTarget, String> {
        match self.connect_to.as_ref() {
            Some(target) if !target.host.is_empty() => Ok(target),
            _ => Err("Server can not be empty.".to_string()),
        }
    }

    /// Connect, then hang up cleanly
    async fn login<O>(&self, options: O) -> Result<(), String>
    where
        O: ConnectOptions,
        O::Connection: Sized,
    {
        let options = options.disable_statement_logging();
        let conn = tokio::time::timeout(self.io_timeout, options.connect())
            .await
            .map_err(|_| format!("Timed out after {:?} waiting for the server.", self.io_timeout))?
            .map_err(|e| e.to_string())?;

        if let Err(e) = conn.close().await {
            debug!("Ignoring error while closing test connection: {}", e);
        }
        Ok(())
    }

    async fn connect_postgres(&self) -> Result<(), String> {
        let target = self.server()?;
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&target.host)
            .port(target.port)
            .username(&self.user);
        if !self.password.is_empty() {
            options = options.password(self.password.expose());
        }
        if !self.database.is_empty() {
            options = options.database(&self.database);
        }
        self.login(options).await
    }

    async fn connect_mysql(&self) -> Result<(), String> {
        let target = self.server()?;
        let mut options = MySqlConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&self.user);
        if !self.password.is_empty() {
            options = options.password(self.password.expose());
        }
        if !self.database.is_empty() {
            options = options.database(&self.database);
        }
        self.login(options).await
    }

    async fn connect_sqlite(&self) -> Result<(), String> {
        let path = if self.conn_string.trim().is_empty() || self.conn_string.contains("://") {
            self.database.trim()
        } else {
            self.conn_string.trim()
        };
        if path.is_empty() {
            return Err("Database file can not be empty.".to_string());
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .read_only(true)
            .disable_statement_logging();

        // Opening is lazy; reading the schema is what rejects a non-database file
        let work = async {
            let mut conn = options.connect().await?;
            let read = sqlx::query("SELECT count(*) FROM sqlite_master")
                .execute(&mut conn)
                .await;
            let _ = conn.close().await;
            read.map(drop)
        };
        tokio::time::timeout(self.io_timeout, work)
            .await
            .map_err(|_| format!("Timed out after {:?} opening {}.", self.io_timeout, path))?
            .map_err(|e| e.to_string())
    }

    /// Oracle and SQL Server: reachability only
    async fn reach_tcp(&self) -> Result<(), String> {
        let target = self.server()?;
        let stream = tokio::time::timeout(
            self.io_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| format!("Timed out connecting to {}:{}", target.host, target.port))?
        .map_err(|e| format!("Could not connect to {}:{}: {}", target.host, target.port, e))?;
        drop(stream);
        Ok(())
    }
}

#[async_trait]
impl DataSource for NetworkDataSource {
    fn technology(&self) -> Technology {
        self.technology
    }

    fn active_target(&self) -> Option<RemoteTarget> {
        self.active.clone()
    }

    fn redirect(&mut self, host: &str, port: u16) {
        self.connect_to = Some(RemoteTarget::new(host, port));
    }

    async fn test_connection(&self) -> String {
        let result = match self.technology {
            Technology::Postgresql => self.connect_postgres().await,
            Technology::Mysql | Technology::Mariadb => self.connect_mysql().await,
            Technology::Oracle | Technology::Mssql => self.reach_tcp().await,
            Technology::Sqlite => self.connect_sqlite().await,
            Technology::Terminal => Err("Terminal connections are tested over SSH.".to_string()),
        };

        match result {
            Ok(()) => CONNECTION_SUCCESSFUL.to_string(),
            Err(message) => message,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedConnString {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

/// Pull the parts out of a `scheme://user:pw@host:port/db?opts` string.
/// Anything else yields nothing and the plain fields apply.
fn parse_conn_string(conn_string: &str) -> ParsedConnString {
    let Some((_, rest)) = conn_string.trim().split_once("://") else {
        return ParsedConnString::default();
    };
    let rest = rest.split(['?', ';']).next().unwrap_or_default();

    let (authority, database) = match rest.split_once('/') {
        Some((authority, db)) => (authority, Some(db)),
        None => (rest, None),
    };
    let (userinfo, host_port) = match authority.rsplit_once('@') {
        Some((userinfo, host_port)) => (Some(userinfo), host_port),
        None => (None, authority),
    };
    let (user, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((user, password)) => (Some(user), Some(password)),
            None => (Some(info), None),
        },
        None => (None, None),
    };

    let (host, port) = match host_port.strip_prefix('[') {
        // [v6addr]:port
        Some(bracketed) => match bracketed.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':').and_then(|p| p.parse().ok())),
            None => (bracketed, None),
        },
        None => match host_port.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()),
            None => (host_port, None),
        },
    };

    let present = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);
    ParsedConnString {
        host: present(Some(host)),
        port,
        database: present(database),
        user: present(user),
        password: present(password),
    }
}
