//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to
//! it through a cloneable [`HandleController`] that sends commands over an
//! mpsc channel, so the handle is never shared behind a lock and never
//! touched concurrently.
//!
//! When the task exits (explicit disconnect, or every controller dropped) it
//! broadcasts a disconnect notification, fails any queued commands, and
//! sends an SSH disconnect to the server.

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use super::client::ClientHandler;
use super::error::SshError;

pub enum HandleCommand {
    /// Open a direct-tcpip channel (local forward)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for the handle owner task.
///
/// Any holder can open channels or disconnect; never hand one out beyond
/// in-process code.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    /// Controller over a bare command channel; the caller plays the owner
    /// task. Used for testing.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        let (disconnect_tx, _) = broadcast::channel(1);
        Self {
            cmd_tx,
            disconnect_tx,
        }
    }

    /// Receiver that fires once when the SSH connection closes
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Non-async disconnect for `Drop` paths. If the queue is full the task
    /// still exits once every controller is gone.
    pub fn disconnect_now(&self) {
        if self.cmd_tx.try_send(HandleCommand::Disconnect).is_err() {
            warn!("Disconnect command not queued; owner task will exit when controllers drop");
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the owner task, consuming the handle
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        let handle = handle;
        info!("Handle owner task started for {}", label);

        loop {
            match cmd_rx.recv().await {
                Some(HandleCommand::ChannelOpenDirectTcpip {
                    host,
                    port,
                    originator_host,
                    originator_port,
                    reply_tx,
                }) => {
                    let result = handle
                        .channel_open_direct_tcpip(&host, port, &originator_host, originator_port)
                        .await;
                    if reply_tx.send(result).is_err() {
                        // Dropped channel is closed by the server
                        warn!("Caller dropped before receiving direct_tcpip result");
                    }
                }
                Some(HandleCommand::Disconnect) => {
                    info!("Disconnect requested for {}", label);
                    break;
                }
                None => {
                    info!("All controllers dropped for {}", label);
                    break;
                }
            }
        }

        let _ = disconnect_tx_clone.send(());
        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Tunnel closed", "en")
            .await;
        info!("Handle owner task terminated for {}", label);
    });

    HandleController {
        cmd_tx,
        disconnect_tx,
    }
}

/// Fail every queued command with `Disconnect`
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_owner_reports_disconnected() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        drop(cmd_rx);
        let controller = HandleController::new(cmd_tx);

        assert!(!controller.is_connected());
        assert!(matches!(
            controller.open_direct_tcpip("db1", 5432, "127.0.0.1", 0).await,
            Err(SshError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_now_queues_command() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);

        controller.disconnect_now();
        assert!(matches!(cmd_rx.recv().await, Some(HandleCommand::Disconnect)));
    }

    #[tokio::test]
    async fn test_drain_fails_queued_opens() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: "db1".into(),
                port: 5432,
                originator_host: "127.0.0.1".into(),
                originator_port: 0,
                reply_tx,
            })
            .await
            .unwrap();

        drain_pending_commands(&mut cmd_rx);
        assert!(matches!(reply_rx.await, Ok(Err(russh::Error::Disconnect))));
    }
}
