//! Remote file operations (spec component 4.E), implemented as plain shell
//! commands run over a one-shot exec channel rather than SFTP — the same
//! tradeoff the teacher's own `sftp/tar_transfer.rs` makes for directories,
//! generalized here to cover single files too.

use std::sync::Arc;
use std::time::Duration;

use russh::ChannelMsg;
use tracing::warn;

use crate::audit::{AuditEntry, AuditLog};
use crate::external::AuditEventKind;
use crate::pool::ConnectionPool;
use crate::ssh::exec_command;

use super::errors::{classify_failure, OpsError};
use super::quote::shell_quote;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Link,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub permissions: String,
}

/// Remote filesystem access for a single instance's SSH session. Every
/// operation is recorded as a `file_operation` audit entry regardless of
/// outcome.
pub struct FileClient {
    pool: Arc<ConnectionPool>,
    audit: Arc<AuditLog>,
    exec_timeout: Duration,
}

impl FileClient {
    pub fn new(pool: Arc<ConnectionPool>, audit: Arc<AuditLog>, exec_timeout: Duration) -> Self {
        Self { pool, audit, exec_timeout }
    }

    fn controller(&self, instance_name: &str) -> Result<crate::ssh::HandleController, OpsError> {
        self.pool
            .get(instance_name)
            .ok_or_else(|| OpsError::NotConnected(instance_name.to_string()))
    }

    fn record(&self, instance_name: &str, op: &str, path: &str) {
        let audit = self.audit.clone();
        let entry = AuditEntry::new(instance_name.to_string(), instance_name.to_string(), AuditEventKind::FileOperation)
            .with_details(format!("{op}: {path}"));
        tokio::spawn(async move {
            if let Err(e) = audit.log(entry).await {
                warn!(error = %e, "failed to write file_operation audit entry");
            }
        });
    }

    /// `ls -l --time-style=long-iso <path>`, parsed into entries. `.` and
    /// `..` are omitted.
    pub async fn list_directory(&self, instance_name: &str, path: &str) -> Result<Vec<FileEntry>, OpsError> {
        let controller = self.controller(instance_name)?;
        self.record(instance_name, "list_directory", path);

        let command = format!("ls -l --time-style=long-iso {}", shell_quote(path));
        let result = exec_command(&controller, &command, self.exec_timeout).await?;

        if !result.success() {
            return Err(classify_failure(path, &result.stderr_string()));
        }

        Ok(parse_ls_output(&result.stdout_string()))
    }

    /// `cat <path>`. Fails with `not_found`/`permission_denied`/`io` per the
    /// failing command's stderr.
    pub async fn read_file(&self, instance_name: &str, path: &str) -> Result<Vec<u8>, OpsError> {
        let controller = self.controller(instance_name)?;
        self.record(instance_name, "read_file", path);

        let command = format!("cat {}", shell_quote(path));
        let result = exec_command(&controller, &command, self.exec_timeout).await?;

        if !result.success() {
            return Err(classify_failure(path, &result.stderr_string()));
        }

        Ok(result.stdout)
    }

    /// `cat > <path>` with `bytes` streamed as stdin, closed on EOF.
    pub async fn write_file(&self, instance_name: &str, path: &str, bytes: &[u8]) -> Result<(), OpsError> {
        let controller = self.controller(instance_name)?;
        self.record(instance_name, "write_file", path);

        let command = format!("cat > {}", shell_quote(path));
        let mut channel = controller.open_session_channel().await.map_err(|e| OpsError::Io {
            path: path.to_string(),
            detail: e.to_string(),
        })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| OpsError::Io { path: path.to_string(), detail: e.to_string() })?;

        for chunk in bytes.chunks(32 * 1024) {
            channel
                .data(chunk)
                .await
                .map_err(|e| OpsError::Io { path: path.to_string(), detail: e.to_string() })?;
        }
        channel
            .eof()
            .await
            .map_err(|e| OpsError::Io { path: path.to_string(), detail: e.to_string() })?;

        let mut stderr = Vec::new();
        let mut exit_status = None;
        let outcome = tokio::time::timeout(self.exec_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => break,
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await;

        if outcome.is_err() {
            let _ = channel.close().await;
            return Err(OpsError::Io { path: path.to_string(), detail: "write timed out".to_string() });
        }

        if exit_status.is_some() && exit_status != Some(0) {
            return Err(classify_failure(path, &String::from_utf8_lossy(&stderr)));
        }

        Ok(())
    }

    /// `mkdir -p <path>`.
    pub async fn create_directory(&self, instance_name: &str, path: &str) -> Result<(), OpsError> {
        let controller = self.controller(instance_name)?;
        self.record(instance_name, "create_directory", path);

        let command = format!("mkdir -p {}", shell_quote(path));
        let result = exec_command(&controller, &command, self.exec_timeout).await?;

        if !result.success() {
            return Err(classify_failure(path, &result.stderr_string()));
        }

        Ok(())
    }
}

/// Parses `ls -l --time-style=long-iso` output into entries, skipping the
/// leading `total N` line and `.`/`..`.
fn parse_ls_output(output: &str) -> Vec<FileEntry> {
    let mut entries = Vec::new();

    for line in output.lines() {
        if line.starts_with("total ") || line.is_empty() {
            continue;
        }

        // perms links owner group size date time name...
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }

        let permissions = fields[0].to_string();
        let kind = match permissions.chars().next() {
            Some('d') => EntryKind::Dir,
            Some('l') => EntryKind::Link,
            _ => EntryKind::File,
        };
        let size = fields[4].parse::<u64>().ok();

        let name = match line.splitn(8, char::is_whitespace).filter(|f| !f.is_empty()).nth(7) {
            Some(n) => n,
            None => continue,
        };
        let name = name.split(" -> ").next().unwrap_or(name).trim().to_string();

        if name == "." || name == ".." {
            continue;
        }

        entries.push(FileEntry {
            name,
            size: if kind == EntryKind::Dir { None } else { size },
            kind,
            permissions,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regular_files_and_skips_dot_entries() {
        let output = "total 8\n\
                       drwxr-xr-x 2 root root 4096 2024-01-01 00:00 .\n\
                       drwxr-xr-x 3 root root 4096 2024-01-01 00:00 ..\n\
                       -rw-r--r-- 1 root root  123 2024-01-01 00:00 agent.log\n\
                       drwxr-xr-x 2 root root 4096 2024-01-01 00:00 workdir\n";
        let entries = parse_ls_output(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "agent.log");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, Some(123));
        assert_eq!(entries[1].name, "workdir");
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[1].size, None);
    }

    #[test]
    fn parses_symlinks_and_trims_the_arrow_target() {
        let output = "lrwxrwxrwx 1 root root 7 2024-01-01 00:00 current -> release-3\n";
        let entries = parse_ls_output(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "current");
        assert_eq!(entries[0].kind, EntryKind::Link);
    }

    #[test]
    fn empty_listing_produces_no_entries() {
        assert!(parse_ls_output("total 0\n").is_empty());
    }
}
