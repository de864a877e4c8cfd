//! Remote log tailing (spec component 4.E). `stream_logs` is the one
//! operation in this crate with no timeout by design (§5's "no timeout for
//! follow-mode log tailing") — the caller controls its lifetime by dropping
//! the returned receiver, which this module's pump task notices and uses to
//! unwind.

use std::sync::Arc;

use russh::ChannelMsg;
use tokio::sync::mpsc;
use tracing::debug;

use crate::pool::ConnectionPool;
use crate::ssh::exec_command;

use super::errors::OpsError;
use super::quote::shell_quote;

pub struct LogClient {
    pool: Arc<ConnectionPool>,
    probe_timeout: std::time::Duration,
}

impl LogClient {
    pub fn new(pool: Arc<ConnectionPool>, probe_timeout: std::time::Duration) -> Self {
        Self { pool, probe_timeout }
    }

    fn controller(&self, instance_name: &str) -> Result<crate::ssh::HandleController, OpsError> {
        self.pool
            .get(instance_name)
            .ok_or_else(|| OpsError::NotConnected(instance_name.to_string()))
    }

    /// Starts `tail -n <tail> <path>` (or `tail -F -n <tail> <path>` when
    /// `follow`) and returns a channel of decoded lines. The non-follow form
    /// closes the channel once its output is exhausted; the follow form runs
    /// until the receiver is dropped.
    pub async fn stream_logs(
        &self,
        instance_name: &str,
        path: &str,
        tail: u32,
        follow: bool,
    ) -> Result<mpsc::Receiver<Result<String, OpsError>>, OpsError> {
        let controller = self.controller(instance_name)?;

        let command = if follow {
            format!("tail -F -n {} {}", tail, shell_quote(path))
        } else {
            format!("tail -n {} {}", tail, shell_quote(path))
        };

        let mut channel = controller.open_session_channel().await.map_err(|e| OpsError::Io {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| OpsError::Io { path: path.to_string(), detail: e.to_string() })?;

        let (tx, rx) = mpsc::channel(256);
        let path = path.to_string();

        tokio::spawn(async move {
            let mut pending = Vec::new();

            loop {
                tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        debug!(%path, "log stream receiver dropped, closing channel");
                        let _ = channel.eof().await;
                        break;
                    }
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { data }) => {
                                pending.extend_from_slice(&data);
                                flush_lines(&mut pending, &tx).await;
                            }
                            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                                pending.extend_from_slice(&data);
                                flush_lines(&mut pending, &tx).await;
                            }
                            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => break,
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }

            if !pending.is_empty() {
                let line = String::from_utf8_lossy(&pending).into_owned();
                let _ = tx.send(Ok(line)).await;
            }
        });

        Ok(rx)
    }

    /// Probes each candidate path with `test -f` and returns those that
    /// exist, in the order given.
    pub async fn available_log_files(&self, instance_name: &str, candidates: &[String]) -> Result<Vec<String>, OpsError> {
        let controller = self.controller(instance_name)?;
        let mut found = Vec::new();

        for candidate in candidates {
            let command = format!("test -f {}", shell_quote(candidate));
            let result = exec_command(&controller, &command, self.probe_timeout).await?;
            if result.success() {
                found.push(candidate.clone());
            }
        }

        Ok(found)
    }
}

async fn flush_lines(pending: &mut Vec<u8>, tx: &mpsc::Sender<Result<String, OpsError>>) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
        if tx.send(Ok(line)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn flush_lines_emits_complete_lines_and_keeps_partial_tail() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut pending = b"line one\nline two\npartial".to_vec();
        flush_lines(&mut pending, &tx).await;
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().unwrap(), "line one");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "line two");
        assert!(rx.recv().await.is_none());
        assert_eq!(pending, b"partial");
    }
}
