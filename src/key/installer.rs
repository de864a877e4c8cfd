//! The one concrete `RemoteKeyInstaller`: installs/revokes a key by editing
//! `~/.ssh/authorized_keys` over the instance's existing Connection Pool
//! session. Grounded on `ops::file`'s pattern of running plain shell
//! commands over a one-shot exec channel rather than SFTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::ops::shell_quote;
use crate::pool::ConnectionPool;
use crate::ssh::exec_command;

use super::error::KeyError;
use super::store::RemoteKeyInstaller;

/// `endpoint` here is interpreted as the instance's name — the Connection
/// Pool is keyed by name, not by host:port, and the pool's `ensure` call is
/// what already knows the dial address.
pub struct SshKeyInstaller {
    pool: Arc<ConnectionPool>,
    exec_timeout: Duration,
}

impl SshKeyInstaller {
    pub fn new(pool: Arc<ConnectionPool>, exec_timeout: Duration) -> Self {
        Self { pool, exec_timeout }
    }

    async fn run(&self, instance_name: &str, command: &str) -> Result<(), KeyError> {
        let controller = self.pool.get(instance_name).ok_or_else(|| KeyError::RemoteInstall {
            name: instance_name.to_string(),
            reason: "no active connection".to_string(),
        })?;

        let result = exec_command(&controller, command, self.exec_timeout)
            .await
            .map_err(|e| KeyError::RemoteInstall {
                name: instance_name.to_string(),
                reason: e.to_string(),
            })?;

        if !result.success() {
            return Err(KeyError::RemoteInstall {
                name: instance_name.to_string(),
                reason: result.stderr_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteKeyInstaller for SshKeyInstaller {
    async fn install(&self, endpoint: &str, public_key_openssh: &str) -> Result<(), KeyError> {
        let command = format!(
            "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo {} >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
            shell_quote(public_key_openssh.trim()),
        );
        self.run(endpoint, &command).await
    }

    async fn revoke(&self, endpoint: &str, public_key_openssh: &str) -> Result<(), KeyError> {
        let command = format!(
            "grep -vF {} ~/.ssh/authorized_keys > ~/.ssh/authorized_keys.tmp && mv ~/.ssh/authorized_keys.tmp ~/.ssh/authorized_keys",
            shell_quote(public_key_openssh.trim()),
        );
        self.run(endpoint, &command).await
    }
}
