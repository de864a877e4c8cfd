//! Single-owner pump task for one PTY channel, mirroring `ssh::handle_owner`:
//! one task owns the `Channel`, everyone else talks to it through a
//! cloneable `PtyController` over an mpsc command channel.

use std::sync::Arc;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::recording::RecordingEventKind;
use super::types::{SessionState, TerminalSession};

enum PtyCommand {
    Write(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    Close,
}

#[derive(Clone)]
pub struct PtyController {
    cmd_tx: mpsc::Sender<PtyCommand>,
}

impl PtyController {
    pub async fn write(&self, data: Vec<u8>) {
        let _ = self.cmd_tx.send(PtyCommand::Write(data)).await;
    }

    pub async fn resize(&self, cols: u16, rows: u16) {
        let _ = self.cmd_tx.send(PtyCommand::Resize { cols, rows }).await;
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(PtyCommand::Close).await;
    }
}

/// A controller paired with its not-yet-wired receiver. Split out so the
/// caller can build the `TerminalSession` (which holds the controller)
/// before the pump task (which needs an `Arc<TerminalSession>` to tee into)
/// exists.
pub fn new_controller() -> (PtyController, mpsc::Receiver<PtyCommand>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<PtyCommand>(256);
    (PtyController { cmd_tx }, cmd_rx)
}

/// Runs the pump loop for an already-requested PTY/shell channel. Tees
/// every byte of channel output into the session's scrollback and (if
/// attached) the live client pipe, and into the optional recorder, until
/// the channel closes or a `Close` command arrives.
pub fn spawn_pty_pump(mut channel: Channel<Msg>, mut cmd_rx: mpsc::Receiver<PtyCommand>, session: Arc<TerminalSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = session.id.clone();
        info!(session_id = %id, "pty pump started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PtyCommand::Write(data)) => {
                            if let Some(recorder) = &session.recorder {
                                recorder.record_bytes(RecordingEventKind::Input, &data);
                            }
                            if let Err(e) = channel.data(&data[..]).await {
                                warn!(session_id = %id, error = %e, "failed to write pty stdin");
                                break;
                            }
                        }
                        Some(PtyCommand::Resize { cols, rows }) => {
                            if let Some(recorder) = &session.recorder {
                                recorder.record_resize(cols, rows);
                            }
                            if let Err(e) = channel.window_change(cols as u32, rows as u32, 0, 0).await {
                                warn!(session_id = %id, error = %e, "pty resize failed");
                            }
                        }
                        Some(PtyCommand::Close) | None => {
                            let _ = channel.eof().await;
                            break;
                        }
                    }
                }
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                            session.scrollback.append(&data);
                            if let Some(recorder) = &session.recorder {
                                recorder.record_bytes(RecordingEventKind::Output, &data);
                            }
                            if let Some(tx) = session.client_tx.read().clone() {
                                if tx.send(data.to_vec()).await.is_err() {
                                    *session.client_tx.write() = None;
                                }
                            }
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                            debug!(session_id = %id, "pty channel closed");
                            break;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!(session_id = %id, exit_status, "pty shell exited");
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        session.set_state(SessionState::Closed);
        *session.client_tx.write() = None;
        let _ = channel.close().await;
        info!(session_id = %id, "pty pump terminated");
    })
}
