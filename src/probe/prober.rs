//! Connectivity Prober
//!
//! Dry-run connection tests. A probe never touches the session registry and
//! never writes to the repository.
//!
//! Secret resolution, per field:
//! 1. `temp_password` (database password only)
//! 2. the value in the request, when non-empty
//! 3. the stored value, when the request names a saved descriptor and the
//!    caller's key is available

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::driver::{DataSourceDriver, DriverParams, ProbeError, CONNECTION_SUCCESSFUL};
use crate::session::TunnelMetadata;
use crate::store::descriptors::{DescriptorStore, ResolvedSecrets};
use crate::store::types::{ConnectionDescriptor, ConnectionInput, PlainSecret};
use crate::tunnel::{TunnelError, TunnelProvider};
use crate::vault::UserKey;

/// A test request: connection settings plus an optional one-shot password
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    #[serde(flatten)]
    pub connection: ConnectionInput,

    /// Overrides every other password source for this probe only
    #[serde(default)]
    pub temp_password: PlainSecret,
}

impl ProbeRequest {
    pub fn new(connection: ConnectionInput) -> Self {
        Self {
            connection,
            temp_password: PlainSecret::default(),
        }
    }
}

/// Result of a probe, in the shape the caller reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub message: String,
    pub is_error: bool,
}

impl ProbeOutcome {
    /// Success iff the message is exactly [`CONNECTION_SUCCESSFUL`]
    pub fn from_message(message: String) -> Self {
        let is_error = message != CONNECTION_SUCCESSFUL;
        Self { message, is_error }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.is_error
    }
}

/// Settings after secret resolution, owned so the probe can run on its own task
#[derive(Debug, Clone)]
struct ProbePlan {
    params: DriverParams,
    tunnel: TunnelMetadata,
}

pub struct ConnectivityProber {
    driver: Arc<dyn DataSourceDriver>,
    tunnels: Arc<dyn TunnelProvider>,
    timeout: Duration,
}

impl ConnectivityProber {
    pub fn new(
        driver: Arc<dyn DataSourceDriver>,
        tunnels: Arc<dyn TunnelProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            driver,
            tunnels,
            timeout,
        }
    }

    /// Run a probe. `stored` is the saved descriptor the request refers to,
    /// if any; `key` unlocks its secrets.
    pub async fn probe(
        &self,
        request: &ProbeRequest,
        stored: Option<&ConnectionDescriptor>,
        key: Option<&UserKey>,
    ) -> ProbeOutcome {
        let plan = match resolve(request, stored, key) {
            Ok(plan) => plan,
            Err(e) => return ProbeOutcome::failure(e.to_string()),
        };

        let driver = self.driver.clone();
        let tunnels = self.tunnels.clone();
        let task = tokio::spawn(async move { run(plan, driver.as_ref(), tunnels.as_ref()).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(message)) => {
                let outcome = ProbeOutcome::from_message(message);
                if outcome.is_error {
                    info!("Connection test failed: {}", outcome.message);
                } else {
                    debug!("Connection test succeeded");
                }
                outcome
            }
            Ok(Err(join_err)) => {
                warn!("Connection test task failed: {}", join_err);
                ProbeOutcome::failure(ProbeError::Aborted(join_err.to_string()).to_string())
            }
            Err(_) => {
                // Dropping the task's state closes any half-open tunnel
                abort.abort();
                warn!("Connection test timed out after {:?}", self.timeout);
                ProbeOutcome::failure(ProbeError::Timeout(self.timeout).to_string())
            }
        }
    }
}

/// Merge the request with stored secrets
fn resolve(
    request: &ProbeRequest,
    stored: Option<&ConnectionDescriptor>,
    key: Option<&UserKey>,
) -> Result<ProbePlan, crate::vault::CryptoError> {
    let input = &request.connection;

    let stored_secrets = match (stored, key) {
        (Some(descriptor), Some(key)) => DescriptorStore::decrypt_secrets(descriptor, key)?,
        _ => ResolvedSecrets::default(),
    };

    let pick = |submitted: &PlainSecret, fallback: Option<PlainSecret>| -> PlainSecret {
        submitted
            .non_empty()
            .cloned()
            .or(fallback)
            .unwrap_or_default()
    };

    let password = match request.temp_password.non_empty() {
        Some(temp) => temp.clone(),
        None => pick(&input.password, stored_secrets.password),
    };

    let tunnel = TunnelMetadata {
        enabled: input.tunnel.enabled,
        host: input.tunnel.host.trim().to_string(),
        port: input.tunnel.port,
        user: input.tunnel.user.trim().to_string(),
        password: pick(&input.tunnel.password, stored_secrets.tunnel_password),
        private_key: pick(&input.tunnel.private_key, stored_secrets.private_key),
        passphrase: pick(&input.tunnel.passphrase, stored_secrets.passphrase),
    };

    Ok(ProbePlan {
        params: DriverParams {
            technology: input.technology,
            host: input.host.trim().to_string(),
            port: input.port,
            database: input.database.trim().to_string(),
            user: input.user.trim().to_string(),
            password,
            connection_id: input.id.existing(),
            alias: input.alias.clone(),
            conn_string: input.conn_string.trim().to_string(),
        },
        tunnel,
    })
}

async fn run(plan: ProbePlan, driver: &dyn DataSourceDriver, tunnels: &dyn TunnelProvider) -> String {
    if plan.params.technology.is_terminal() {
        return match tunnels.verify_login(&plan.tunnel.endpoint()).await {
            Ok(()) => CONNECTION_SUCCESSFUL.to_string(),
            Err(e) => e.to_string(),
        };
    }

    let technology = plan.params.technology;
    let mut source = match driver.instantiate(plan.params) {
        Ok(source) => source,
        Err(e) => return e.to_string(),
    };

    if !plan.tunnel.enabled {
        return source.test_connection().await;
    }

    let Some(target) = source.active_target() else {
        return ProbeError::NoNetworkTarget(technology).to_string();
    };

    let tunnel = match tunnels.open(&plan.tunnel.endpoint(), &target).await {
        Ok(tunnel) => tunnel,
        Err(e) => return tunnel_failure(e),
    };

    source.redirect("127.0.0.1", tunnel.local_port());
    debug!(
        "Probing {}:{} through tunnel port {}",
        target.host,
        target.port,
        tunnel.local_port()
    );
    let message = source.test_connection().await;
    tunnel.close().await;
    message
}

fn tunnel_failure(err: TunnelError) -> String {
    info!("Tunnel for connection test failed: {}", err);
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::DataSource;
    use crate::ssh::{SshEndpoint, TunnelAuth};
    use crate::store::types::{
        ConnectionId, SaveTarget, SealedSecret, Technology, TunnelRecord, UserId,
    };
    use crate::tunnel::{RemoteTarget, Tunnel};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Data source that succeeds iff it sees the expected password at the
    /// expected host
    #[derive(Debug)]
    struct FakeSource {
        params: DriverParams,
        connect_to: (String, u16),
        expected_password: String,
        seen: Arc<Mutex<Vec<(String, u16, String)>>>,
        hang: bool,
    }

    #[async_trait]
    impl DataSource for FakeSource {
        fn technology(&self) -> Technology {
            self.params.technology
        }

        fn active_target(&self) -> Option<RemoteTarget> {
            Some(RemoteTarget::new(
                self.params.host.clone(),
                self.params.port.unwrap_or(5432),
            ))
        }

        fn redirect(&mut self, host: &str, port: u16) {
            self.connect_to = (host.to_string(), port);
        }

        async fn test_connection(&self) -> String {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.seen.lock().push((
                self.connect_to.0.clone(),
                self.connect_to.1,
                self.params.password.expose().to_string(),
            ));
            if self.params.password.expose() == self.expected_password {
                CONNECTION_SUCCESSFUL.to_string()
            } else {
                "password authentication failed for user".to_string()
            }
        }
    }

    #[derive(Default)]
    struct FakeDriver {
        expected_password: String,
        seen: Arc<Mutex<Vec<(String, u16, String)>>>,
        hang: bool,
    }

    impl DataSourceDriver for FakeDriver {
        fn instantiate(&self, params: DriverParams) -> Result<Box<dyn DataSource>, ProbeError> {
            let connect_to = (params.host.clone(), params.port.unwrap_or(5432));
            Ok(Box::new(FakeSource {
                params,
                connect_to,
                expected_password: self.expected_password.clone(),
                seen: self.seen.clone(),
                hang: self.hang,
            }))
        }
    }

    /// Tunnel provider that records opens/closes and checks login password
    #[derive(Default)]
    struct FakeTunnels {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        logins: Mutex<Vec<SshEndpoint>>,
        accept_password: String,
    }

    struct FakeTunnel {
        port: u16,
        closed: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl Drop for FakeTunnel {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tunnel for FakeTunnel {
        fn local_port(&self) -> u16 {
            self.port
        }

        async fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl FakeTunnels {
        fn check(&self, endpoint: &SshEndpoint) -> Result<(), TunnelError> {
            self.logins.lock().push(endpoint.clone());
            match &endpoint.auth {
                TunnelAuth::Password { password } if password.expose() == self.accept_password => {
                    Ok(())
                }
                _ => Err(TunnelError::Authentication(
                    "Authentication rejected by server".into(),
                )),
            }
        }
    }

    #[async_trait]
    impl TunnelProvider for FakeTunnels {
        async fn open(
            &self,
            endpoint: &SshEndpoint,
            _target: &RemoteTarget,
        ) -> Result<Box<dyn Tunnel>, TunnelError> {
            self.check(endpoint)?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeTunnel {
                port: 40001,
                closed: self.closed.clone(),
                released: self.released.clone(),
            }))
        }

        async fn verify_login(&self, endpoint: &SshEndpoint) -> Result<(), TunnelError> {
            self.check(endpoint)
        }
    }

    fn prober(driver: FakeDriver, tunnels: Arc<FakeTunnels>) -> ConnectivityProber {
        ConnectivityProber::new(Arc::new(driver), tunnels, Duration::from_secs(5))
    }

    fn postgres_request() -> ProbeRequest {
        let mut input = ConnectionInput::new(Technology::Postgresql);
        input.host = "db1".into();
        input.port = Some(5432);
        input.database = "app".into();
        input.user = "alice".into();
        input.password = "secret".into();
        ProbeRequest::new(input)
    }

    fn stored_descriptor(key: &UserKey) -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: ConnectionId(7),
            owner: UserId(1),
            technology: Technology::Postgresql,
            alias: "app".into(),
            host: "db1".into(),
            port: Some(5432),
            database: "app".into(),
            username: "alice".into(),
            password: SealedSecret::seal("secret", key).unwrap(),
            conn_string: String::new(),
            public: false,
            tunnel: TunnelRecord {
                password: SealedSecret::seal("tunnel-pw", key).unwrap(),
                ..Default::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn driver_expecting(password: &str) -> FakeDriver {
        FakeDriver {
            expected_password: password.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_direct_probe_success() {
        let prober = prober(driver_expecting("secret"), Arc::new(FakeTunnels::default()));
        let outcome = prober.probe(&postgres_request(), None, None).await;
        assert_eq!(outcome.message, CONNECTION_SUCCESSFUL);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_driver_message_passed_through() {
        let prober = prober(driver_expecting("other"), Arc::new(FakeTunnels::default()));
        let outcome = prober.probe(&postgres_request(), None, None).await;
        assert_eq!(outcome.message, "password authentication failed for user");
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn test_empty_password_falls_back_to_stored() {
        let key = UserKey::generate();
        let stored = stored_descriptor(&key);
        let driver = driver_expecting("secret");
        let seen = driver.seen.clone();
        let prober = prober(driver, Arc::new(FakeTunnels::default()));

        let mut request = postgres_request();
        request.connection.id = SaveTarget::Existing(stored.id);
        request.connection.password = PlainSecret::default();

        let outcome = prober.probe(&request, Some(&stored), Some(&key)).await;
        assert!(outcome.is_success(), "{}", outcome.message);
        assert_eq!(seen.lock()[0].2, "secret");
    }

    #[tokio::test]
    async fn test_temp_password_overrides_everything() {
        let key = UserKey::generate();
        let stored = stored_descriptor(&key);
        let driver = driver_expecting("one-shot");
        let prober = prober(driver, Arc::new(FakeTunnels::default()));

        let mut request = postgres_request();
        request.temp_password = "one-shot".into();

        let outcome = prober.probe(&request, Some(&stored), Some(&key)).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_without_key_stored_secrets_are_unavailable() {
        let key = UserKey::generate();
        let stored = stored_descriptor(&key);
        let prober = prober(driver_expecting("secret"), Arc::new(FakeTunnels::default()));

        let mut request = postgres_request();
        request.connection.password = PlainSecret::default();

        let outcome = prober.probe(&request, Some(&stored), None).await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn test_wrong_key_is_reported() {
        let stored = stored_descriptor(&UserKey::generate());
        let prober = prober(driver_expecting("secret"), Arc::new(FakeTunnels::default()));

        let outcome = prober
            .probe(&postgres_request(), Some(&stored), Some(&UserKey::generate()))
            .await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn test_terminal_wrong_password_fails() {
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "right".into(),
            ..Default::default()
        });
        let prober = prober(FakeDriver::default(), tunnels.clone());

        let mut input = ConnectionInput::new(Technology::Terminal);
        input.tunnel.host = "host1".into();
        input.tunnel.port = 22;
        input.tunnel.user = "bob".into();
        input.tunnel.password = "wrong".into();

        let outcome = prober.probe(&ProbeRequest::new(input), None, None).await;
        assert!(outcome.is_error);
        assert_ne!(outcome.message, CONNECTION_SUCCESSFUL);

        let logins = tunnels.logins.lock();
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].host, "host1");
        assert_eq!(logins[0].username, "bob");
        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_right_password_succeeds() {
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "right".into(),
            ..Default::default()
        });
        let prober = prober(FakeDriver::default(), tunnels);

        let mut input = ConnectionInput::new(Technology::Terminal);
        input.tunnel.host = "host1".into();
        input.tunnel.user = "bob".into();
        input.tunnel.password = "right".into();

        let outcome = prober.probe(&ProbeRequest::new(input), None, None).await;
        assert_eq!(outcome.message, CONNECTION_SUCCESSFUL);
    }

    fn tunneled_request() -> ProbeRequest {
        let mut request = postgres_request();
        request.connection.tunnel.enabled = true;
        request.connection.tunnel.host = "bastion".into();
        request.connection.tunnel.user = "ops".into();
        request.connection.tunnel.password = "tunnel-pw".into();
        request
    }

    #[tokio::test]
    async fn test_tunnel_redirects_and_closes_on_success() {
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "tunnel-pw".into(),
            ..Default::default()
        });
        let driver = driver_expecting("secret");
        let seen = driver.seen.clone();
        let prober = prober(driver, tunnels.clone());

        let outcome = prober.probe(&tunneled_request(), None, None).await;
        assert!(outcome.is_success(), "{}", outcome.message);
        assert_eq!(seen.lock()[0].0, "127.0.0.1");
        assert_eq!(seen.lock()[0].1, 40001);
        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 1);
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tunnel_closed_when_probe_fails() {
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "tunnel-pw".into(),
            ..Default::default()
        });
        let prober = prober(driver_expecting("not-this"), tunnels.clone());

        let outcome = prober.probe(&tunneled_request(), None, None).await;
        assert!(outcome.is_error);
        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 1);
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tunnel_password_falls_back_to_stored() {
        let key = UserKey::generate();
        let stored = stored_descriptor(&key);
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "tunnel-pw".into(),
            ..Default::default()
        });
        let prober = prober(driver_expecting("secret"), tunnels.clone());

        let mut request = tunneled_request();
        request.connection.id = SaveTarget::Existing(stored.id);
        request.connection.tunnel.password = PlainSecret::default();

        let outcome = prober.probe(&request, Some(&stored), Some(&key)).await;
        assert!(outcome.is_success(), "{}", outcome.message);
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tunnel_auth_failure_reported() {
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "something-else".into(),
            ..Default::default()
        });
        let prober = prober(driver_expecting("secret"), tunnels.clone());

        let outcome = prober.probe(&tunneled_request(), None, None).await;
        assert!(outcome.is_error);
        assert!(outcome.message.contains("authentication failed"));
        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let driver = FakeDriver {
            expected_password: "secret".into(),
            hang: true,
            ..Default::default()
        };
        let prober = ConnectivityProber::new(
            Arc::new(driver),
            Arc::new(FakeTunnels::default()),
            Duration::from_millis(100),
        );

        let outcome = prober.probe(&postgres_request(), None, None).await;
        assert!(outcome.is_error);
        assert!(outcome.message.contains("timed out after 100ms"), "{}", outcome.message);
    }

    #[tokio::test]
    async fn test_timeout_releases_open_tunnel() {
        let tunnels = Arc::new(FakeTunnels {
            accept_password: "tunnel-pw".into(),
            ..Default::default()
        });
        let driver = FakeDriver {
            expected_password: "secret".into(),
            hang: true,
            ..Default::default()
        };
        let prober = ConnectivityProber::new(
            Arc::new(driver),
            tunnels.clone(),
            Duration::from_millis(100),
        );

        let outcome = prober.probe(&tunneled_request(), None, None).await;
        assert!(outcome.is_error);
        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 1);

        // Abort lands on the runtime asynchronously
        for _ in 0..50 {
            if tunnels.released.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(tunnels.released.load(Ordering::SeqCst), 1);
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_request_json_shape() {
        let request: ProbeRequest = serde_json::from_str(
            r#"{"id": -1, "technology": "postgresql", "host": "db1",
                "password": "", "temp_password": "once",
                "tunnel": {"enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(request.connection.id, SaveTarget::New);
        assert_eq!(request.temp_password.expose(), "once");
        assert!(request.connection.password.is_empty());
    }
}
