//! Single-owner task for a connected SSH `Handle`.
//!
//! Exactly one task ever touches the `russh::client::Handle` returned by
//! [`dial`](super::client::dial). Every other component — tunnels, terminal
//! sessions, the keepalive prober — talks to it through a cloneable
//! [`HandleController`] that sends commands over an mpsc channel. This keeps
//! the handle itself un-shared (no `Arc<Mutex<Handle>>`, no lock held across
//! an `.await`) and makes a dropped caller harmless: the owner task notices
//! the command's reply channel is gone and cleans up on its own.

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;

/// Distinguishes a soft keepalive miss (may be transient) from a hard I/O
/// failure (connection is gone), so callers can decide how eagerly to
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingResult {
    Ok,
    Timeout,
    IoError,
}

pub enum HandleCommand {
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },
    TcpipForward {
        address: String,
        port: u32,
        reply_tx: oneshot::Sender<Result<u32, russh::Error>>,
    },
    CancelTcpipForward {
        address: String,
        port: u32,
        reply_tx: oneshot::Sender<Result<(), russh::Error>>,
    },
    Ping {
        reply_tx: oneshot::Sender<PingResult>,
    },
    Disconnect,
}

/// Handle to a live SSH connection's owner task. Cloning is cheap (it's just
/// channel senders) and any holder has full control over the connection —
/// this type must never cross a process boundary or be exposed to anything
/// outside this crate's own components.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    /// Subscribe to disconnect notifications. Tunnels, terminal sessions, and
    /// log streams select on this to unwind promptly when the connection
    /// leaves `connected`.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, russh::Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| russh::Error::Disconnect)?;
        reply_rx.await.map_err(|_| russh::Error::Disconnect)?
    }

    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, russh::Error> {
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
            .map_err(|_| russh::Error::Disconnect)?;
        reply_rx.await.map_err(|_| russh::Error::Disconnect)?
    }

    pub async fn tcpip_forward(&self, address: &str, port: u32) -> Result<u32, russh::Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::TcpipForward {
                address: address.to_string(),
                port,
                reply_tx,
            })
            .await
            .map_err(|_| russh::Error::Disconnect)?;
        reply_rx.await.map_err(|_| russh::Error::Disconnect)?
    }

    pub async fn cancel_tcpip_forward(&self, address: &str, port: u32) -> Result<(), russh::Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::CancelTcpipForward {
                address: address.to_string(),
                port,
                reply_tx,
            })
            .await
            .map_err(|_| russh::Error::Disconnect)?;
        reply_rx.await.map_err(|_| russh::Error::Disconnect)?
    }

    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// SSH global request `keepalive@openssh.com`, with reply required.
    pub async fn ping(&self) -> PingResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(HandleCommand::Ping { reply_tx }).await.is_err() {
            return PingResult::IoError;
        }
        reply_rx.await.unwrap_or(PingResult::IoError)
    }

    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawns the owner task and returns a controller for it. The task runs
/// until every `HandleController` clone is dropped or a `Disconnect` command
/// arrives, then sends the SSH disconnect message and notifies subscribers.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, instance: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        let mut handle = handle;

        info!(%instance, "handle owner task started");

        loop {
            match cmd_rx.recv().await {
                Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        warn!(%instance, "caller dropped before receiving channel_open_session result");
                    }
                }
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
                        warn!(%instance, "caller dropped before receiving direct_tcpip result");
                    }
                }
                Some(HandleCommand::TcpipForward { address, port, reply_tx }) => {
                    let result = handle.tcpip_forward(&address, port).await;
                    match &result {
                        Ok(bound_port) => {
                            let bound_port = *bound_port;
                            if reply_tx.send(result).is_err() {
                                warn!(
                                    %instance,
                                    %address,
                                    bound_port,
                                    "caller dropped after tcpip_forward succeeded; cancelling orphaned forward"
                                );
                                let _ = handle.cancel_tcpip_forward(&address, bound_port).await;
                            }
                        }
                        Err(_) => {
                            let _ = reply_tx.send(result);
                        }
                    }
                }
                Some(HandleCommand::CancelTcpipForward { address, port, reply_tx }) => {
                    let result = handle.cancel_tcpip_forward(&address, port).await;
                    if reply_tx.send(result).is_err() {
                        warn!(%instance, "caller dropped before receiving cancel_tcpip_forward result");
                    }
                }
                Some(HandleCommand::Ping { reply_tx }) => {
                    debug!(%instance, "keepalive probe");
                    let result = match tokio::time::timeout(
                        std::time::Duration::from_secs(5),
                        handle.send_keepalive(true),
                    )
                    .await
                    {
                        Ok(Ok(())) => PingResult::Ok,
                        Ok(Err(e)) => {
                            let msg = format!("{e:?}");
                            if msg.contains("Disconnect") || msg.contains("disconnect") {
                                warn!(%instance, error = %msg, "keepalive hit a hard disconnect");
                                PingResult::IoError
                            } else {
                                warn!(%instance, error = %msg, "keepalive soft failure");
                                PingResult::Timeout
                            }
                        }
                        Err(_) => {
                            warn!(%instance, "keepalive timed out after 5s");
                            PingResult::Timeout
                        }
                    };
                    let _ = reply_tx.send(result);
                }
                Some(HandleCommand::Disconnect) => {
                    info!(%instance, "disconnect requested");
                    break;
                }
                None => {
                    info!(%instance, "all controllers dropped");
                    break;
                }
            }
        }

        let _ = disconnect_tx_clone.send(());
        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "session closed", "en")
            .await;
        info!(%instance, "handle owner task terminated");
    });

    HandleController { cmd_tx, disconnect_tx }
}

fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::TcpipForward { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::CancelTcpipForward { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Ping { reply_tx } => {
                let _ = reply_tx.send(PingResult::IoError);
            }
            HandleCommand::Disconnect => {}
        }
    }
}
