//! Tunnel Broker
//!
//! Authenticates to an SSH endpoint and exposes a loopback port forwarding
//! to a remote target. A failed `open` leaves nothing behind: the SSH
//! session is disconnected before the error is returned.

use async_trait::async_trait;
use tracing::{info, warn};

use super::error::TunnelError;
use super::forward::{start_local_forward, LocalForwardHandle, RemoteTarget, LOOPBACK_BIND};
use crate::config::CoreSettings;
use crate::ssh::{spawn_handle_owner_task, ClientOptions, HandleController, SshClient, SshEndpoint};

/// An open tunnel. `close` is the normal teardown path; dropping an
/// unclosed tunnel still releases the listener and the SSH session.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Loopback port accepting connections for the remote target
    fn local_port(&self) -> u16;

    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn open(
        &self,
        endpoint: &SshEndpoint,
        target: &RemoteTarget,
    ) -> Result<Box<dyn Tunnel>, TunnelError>;

    /// Authenticate, then disconnect. No forwarding.
    async fn verify_login(&self, endpoint: &SshEndpoint) -> Result<(), TunnelError>;
}

/// A tunnel backed by a live russh session
pub struct TunnelHandle {
    label: String,
    controller: HandleController,
    forward: LocalForwardHandle,
    closed: bool,
}

impl TunnelHandle {
    pub fn target(&self) -> &RemoteTarget {
        self.forward.target()
    }
}

#[async_trait]
impl Tunnel for TunnelHandle {
    fn local_port(&self) -> u16 {
        self.forward.local_port()
    }

    async fn close(self: Box<Self>) {
        let mut this = self;
        this.forward.stop().await;
        this.controller.disconnect().await;
        this.closed = true;
        let target = this.target();
        info!(
            "Tunnel {} closed, {}:{} no longer reachable on port {}",
            this.label,
            target.host,
            target.port,
            this.forward.local_port()
        );
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Tunnel {} dropped without close, tearing down", self.label);
            self.controller.disconnect_now();
        }
    }
}

/// russh-backed [`TunnelProvider`]
pub struct TunnelBroker {
    options: ClientOptions,
}

impl TunnelBroker {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    pub fn from_settings(settings: &CoreSettings) -> Self {
        Self::new(ClientOptions::from(settings))
    }
}

impl Default for TunnelBroker {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

fn check_endpoint(endpoint: &SshEndpoint) -> Result<(), TunnelError> {
    if endpoint.host.trim().is_empty() {
        return Err(TunnelError::InvalidConfig("SSH server is empty".into()));
    }
    if endpoint.username.trim().is_empty() {
        return Err(TunnelError::InvalidConfig("SSH user is empty".into()));
    }
    if endpoint.port == 0 {
        return Err(TunnelError::InvalidConfig("SSH port is zero".into()));
    }
    Ok(())
}

#[async_trait]
impl TunnelProvider for TunnelBroker {
    async fn open(
        &self,
        endpoint: &SshEndpoint,
        target: &RemoteTarget,
    ) -> Result<Box<dyn Tunnel>, TunnelError> {
        check_endpoint(endpoint)?;

        let handle = SshClient::new(endpoint.clone(), self.options.clone())
            .connect()
            .await?;

        let label = format!(
            "{}@{} -> {}:{}",
            endpoint.username,
            endpoint.address(),
            target.host,
            target.port
        );
        let controller = spawn_handle_owner_task(handle, label.clone());

        match start_local_forward(controller.clone(), LOOPBACK_BIND, target.clone()).await {
            Ok(forward) => {
                info!("Tunnel {} listening on port {}", label, forward.local_port());
                Ok(Box::new(TunnelHandle {
                    label,
                    controller,
                    forward,
                    closed: false,
                }))
            }
            Err(e) => {
                controller.disconnect().await;
                Err(e)
            }
        }
    }

    async fn verify_login(&self, endpoint: &SshEndpoint) -> Result<(), TunnelError> {
        check_endpoint(endpoint)?;

        let handle = SshClient::new(endpoint.clone(), self.options.clone())
            .connect()
            .await?;

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Login check complete", "en")
            .await;
        info!("Verified SSH login for {}@{}", endpoint.username, endpoint.address());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{HandleCommand, TunnelAuth};
    use crate::store::types::PlainSecret;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn endpoint(host: &str, port: u16, user: &str) -> SshEndpoint {
        SshEndpoint {
            host: host.into(),
            port,
            username: user.into(),
            auth: TunnelAuth::Password {
                password: PlainSecret::new("wrong"),
            },
        }
    }

    fn quick_broker() -> TunnelBroker {
        TunnelBroker::new(ClientOptions {
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        })
    }

    async fn local_tunnel() -> (TunnelHandle, mpsc::Receiver<HandleCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let controller = HandleController::new(cmd_tx);
        let forward = start_local_forward(
            controller.clone(),
            LOOPBACK_BIND,
            RemoteTarget::new("db1", 5432),
        )
        .await
        .unwrap();
        let tunnel = TunnelHandle {
            label: "ops@bastion:22 -> db1:5432".into(),
            controller,
            forward,
            closed: false,
        };
        (tunnel, cmd_rx)
    }

    #[tokio::test]
    async fn test_close_releases_port_and_disconnects_once() {
        let (tunnel, mut cmd_rx) = local_tunnel().await;
        assert_eq!(tunnel.target(), &RemoteTarget::new("db1", 5432));
        let port = tunnel.local_port();

        Box::new(tunnel).close().await;
        assert!(matches!(cmd_rx.recv().await, Some(HandleCommand::Disconnect)));
        assert!(cmd_rx.try_recv().is_err());
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_without_close_disconnects() {
        let (tunnel, mut cmd_rx) = local_tunnel().await;
        drop(tunnel);
        assert!(matches!(cmd_rx.recv().await, Some(HandleCommand::Disconnect)));
    }

    #[tokio::test]
    async fn test_incomplete_endpoint_is_invalid() {
        let broker = quick_broker();
        let target = RemoteTarget::new("db1", 5432);

        assert!(matches!(
            broker.open(&endpoint("", 22, "bob"), &target).await,
            Err(TunnelError::InvalidConfig(_))
        ));
        assert!(matches!(
            broker.verify_login(&endpoint("host1", 22, " ")).await,
            Err(TunnelError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_without_leaking() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let broker = quick_broker();
        let result = broker
            .open(&endpoint("127.0.0.1", port, "bob"), &RemoteTarget::new("db1", 5432))
            .await;
        assert!(matches!(result, Err(TunnelError::Connection(_))));
    }

    #[tokio::test]
    async fn test_non_ssh_peer_is_reported() {
        // Speaks something that is not SSH, then hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });

        let broker = quick_broker();
        let result = broker.verify_login(&endpoint("127.0.0.1", port, "bob")).await;
        assert!(result.is_err());
    }
}
