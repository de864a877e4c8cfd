//! One-shot remote command execution over a session channel opened through a
//! [`HandleController`](super::handle_owner::HandleController).

use std::time::Duration;

use russh::ChannelMsg;
use tokio::time::timeout;

use super::handle_owner::HandleController;

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
}

impl ExecResult {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to open exec channel: {0}")]
    ChannelOpen(#[source] russh::Error),
    #[error("failed to start command: {0}")]
    Start(#[source] russh::Error),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs `command` to completion, collecting stdout/stderr and the exit
/// status, bounded by `timeout`.
pub async fn exec(
    controller: &HandleController,
    command: &str,
    timeout_duration: Duration,
) -> Result<ExecResult, ExecError> {
    let mut channel = controller
        .open_session_channel()
        .await
        .map_err(ExecError::ChannelOpen)?;

    channel
        .exec(true, command.to_string())
        .await
        .map_err(ExecError::Start)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    let collected = timeout(timeout_duration, async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => break,
                Some(_) => {}
                None => break,
            }
        }
    })
    .await;

    if collected.is_err() {
        let _ = channel.eof().await;
        return Err(ExecError::Timeout(timeout_duration));
    }

    Ok(ExecResult {
        stdout,
        stderr,
        exit_status,
    })
}
