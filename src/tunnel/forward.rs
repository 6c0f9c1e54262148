//! Local Port Forwarding
//!
//! Listens on a loopback port and relays every accepted socket through a
//! direct-tcpip channel to a fixed remote target.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::TunnelError;
use crate::ssh::{HandleController, SshError};

/// Bind address for tunnel listeners: loopback, OS-assigned port
pub const LOOPBACK_BIND: &str = "127.0.0.1:0";

/// How long `stop` waits for in-flight connections to wind down
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Host and port the tunnel forwards to, as seen from the SSH server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForwardStats {
    pub connection_count: u64,
    pub active_connections: u64,
    /// Bytes local -> remote
    pub bytes_sent: u64,
    /// Bytes remote -> local
    pub bytes_received: u64,
}

/// Handle to a running local forward. Dropping it stops the listener.
pub struct LocalForwardHandle {
    target: RemoteTarget,
    bound_addr: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    stats: Arc<RwLock<ForwardStats>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalForwardHandle {
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    pub fn local_port(&self) -> u16 {
        self.bound_addr.port()
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Stop accepting, interrupt open connections, and wait for the
    /// listener to be released
    pub async fn stop(&self) {
        info!("Stopping local port forward on {}", self.bound_addr);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Forward accept task ended abnormally: {}", e);
            }
        }

        let start = Instant::now();
        while self.stats.read().active_connections > 0 {
            if start.elapsed() > DRAIN_TIMEOUT {
                warn!(
                    "Timeout waiting for {} active connections to close on {}",
                    self.stats.read().active_connections,
                    self.bound_addr
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }
}

impl Drop for LocalForwardHandle {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Forward handle for {} dropped while running", self.bound_addr);
            let _ = self.shutdown_tx.send(());
        }
    }
}

/// Bind `bind_addr` and start relaying connections to `target`.
///
/// The accept loop exits on stop, on handle drop, or when the SSH
/// connection behind `controller` goes away.
pub async fn start_local_forward(
    controller: HandleController,
    bind_addr: &str,
    target: RemoteTarget,
) -> Result<LocalForwardHandle, TunnelError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => {
                TunnelError::Bind(format!("Port already in use: {}", bind_addr))
            }
            std::io::ErrorKind::PermissionDenied => {
                TunnelError::Bind(format!("Permission denied binding to {}", bind_addr))
            }
            _ => TunnelError::Bind(format!("Failed to bind to {}: {}", bind_addr, e)),
        })?;

    let bound_addr = listener
        .local_addr()
        .map_err(|e| TunnelError::Bind(format!("Failed to get bound address: {}", e)))?;

    info!(
        "Started local port forward: {} -> {}:{}",
        bound_addr, target.host, target.port
    );

    let running = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let stats = Arc::new(RwLock::new(ForwardStats::default()));

    let running_clone = running.clone();
    let stats_clone = stats.clone();
    let shutdown_for_conns = shutdown_tx.clone();
    let loop_target = target.clone();
    let mut disconnect_rx = controller.subscribe_disconnect();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = disconnect_rx.recv() => {
                    info!("Local port forward stopped: SSH disconnected");
                    break;
                }

                // Fires on stop() and when the handle is dropped
                _ = shutdown_rx.recv() => {
                    info!("Local port forward stopped by request");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if !running_clone.load(Ordering::SeqCst) {
                                break;
                            }
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }
                            debug!("Accepted connection from {} for forward", peer_addr);

                            {
                                let mut s = stats_clone.write();
                                s.connection_count += 1;
                                s.active_connections += 1;
                            }

                            let controller = controller.clone();
                            let target = loop_target.clone();
                            let stats_for_conn = stats_clone.clone();
                            let conn_shutdown = shutdown_for_conns.subscribe();

                            tokio::spawn(async move {
                                let result = bridge_connection(
                                    controller,
                                    stream,
                                    peer_addr,
                                    &target,
                                    stats_for_conn.clone(),
                                    conn_shutdown,
                                )
                                .await;

                                {
                                    let mut s = stats_for_conn.write();
                                    s.active_connections = s.active_connections.saturating_sub(1);
                                }

                                if let Err(e) = result {
                                    warn!("Forward connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }

        running_clone.store(false, Ordering::SeqCst);
        drop(listener);
        info!("Local port forward task exited");
    });

    Ok(LocalForwardHandle {
        target,
        bound_addr,
        running,
        shutdown_tx,
        stats,
        task: Mutex::new(Some(task)),
    })
}

/// Relay one accepted socket through a fresh direct-tcpip channel
async fn bridge_connection(
    controller: HandleController,
    mut local_stream: TcpStream,
    peer_addr: SocketAddr,
    target: &RemoteTarget,
    stats: Arc<RwLock<ForwardStats>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), SshError> {
    let relay = async {
        let channel = controller
            .open_direct_tcpip(
                &target.host,
                u32::from(target.port),
                &peer_addr.ip().to_string(),
                u32::from(peer_addr.port()),
            )
            .await?;
        debug!("Opened channel for forward to {}:{}", target.host, target.port);

        let mut remote_stream = channel.into_stream();
        match tokio::io::copy_bidirectional(&mut local_stream, &mut remote_stream).await {
            Ok((sent, received)) => {
                let mut s = stats.write();
                s.bytes_sent += sent;
                s.bytes_received += received;
            }
            Err(e) => debug!("Forward relay ended: {}", e),
        }
        Ok::<(), SshError>(())
    };

    tokio::select! {
        result = relay => result?,
        _ = shutdown_rx.recv() => debug!("Forward connection interrupted by shutdown"),
    }

    debug!("Forward connection closed");
    Ok(())
}
