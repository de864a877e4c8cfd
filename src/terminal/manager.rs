use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::pool::ConnectionPool;

use super::error::TerminalError;
use super::pty::{self, spawn_pty_pump};
use super::types::{SessionState, TerminalSession, TerminalSummary};

/// Tracks every interactive PTY session layered on top of the Connection
/// Pool's sessions (spec component 4.D).
pub struct TerminalManager {
    pool: Arc<ConnectionPool>,
    config: Config,
    sessions: DashMap<String, Arc<TerminalSession>>,
    active_count: AtomicUsize,
    create_lock: parking_lot::Mutex<()>,
}

impl TerminalManager {
    pub fn new(pool: Arc<ConnectionPool>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            sessions: DashMap::new(),
            active_count: AtomicUsize::new(0),
            create_lock: parking_lot::Mutex::new(()),
        })
    }

    /// Opens a PTY on the instance's shared SSH session and starts the pump
    /// task. The new session starts `active` with no client pipe attached
    /// yet; call `attach` to connect one and receive the scrollback (empty
    /// for a freshly created session).
    pub async fn create(&self, instance_name: &str, user_id: &str, shell: &str) -> Result<Arc<TerminalSession>, TerminalError> {
        if !self.config.terminal.allowed_shells.iter().any(|s| s == shell) {
            return Err(TerminalError::InvalidShell(shell.to_string()));
        }

        let controller = self
            .pool
            .get(instance_name)
            .ok_or_else(|| TerminalError::NotConnected(instance_name.to_string()))?;

        // Serializes session creation the way the Connection Pool serializes
        // `ensure`, so two racing creates for the same instance never both
        // pass a would-be connection-count check mid-transition.
        let _guard = self.create_lock.lock();

        let mut channel = controller.open_session_channel().await?;
        channel.request_pty(false, "xterm-256color", 80, 24, 0, 0, &[]).await?;
        channel.request_shell(false).await?;

        let id = Uuid::new_v4().to_string();
        let (pty_controller, cmd_rx) = pty::new_controller();
        let session = TerminalSession::new(
            id.clone(),
            instance_name.to_string(),
            user_id.to_string(),
            shell.to_string(),
            self.config.terminal.scrollback_bytes,
            self.config.terminal.recording,
            pty_controller,
        );

        let task = spawn_pty_pump(channel, cmd_rx, session.clone());
        *session.pump_task.lock() = Some(task);

        self.sessions.insert(id, session.clone());
        self.active_count.fetch_add(1, Ordering::SeqCst);
        info!(instance = instance_name, user_id, shell, "terminal session created");

        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Connects `client_tx` as the session's live output pipe. The
    /// scrollback snapshot is written to it first, synchronously, so the
    /// caller is guaranteed no live byte can arrive ahead of the backlog —
    /// only one client may be attached at a time; attaching replaces (and
    /// implicitly detaches) whatever was attached before.
    pub async fn attach(&self, id: &str, client_tx: mpsc::Sender<Vec<u8>>) -> Result<(), TerminalError> {
        let session = self.get(id).ok_or_else(|| TerminalError::NotFound(id.to_string()))?;

        let snapshot = session.scrollback.snapshot();
        if !snapshot.is_empty() && client_tx.send(snapshot).await.is_err() {
            return Ok(());
        }

        *session.client_tx.write() = Some(client_tx);
        session.set_state(SessionState::Active);
        session.touch();
        Ok(())
    }

    pub fn detach(&self, id: &str) {
        if let Some(session) = self.get(id) {
            *session.client_tx.write() = None;
            if session.state() != SessionState::Closed {
                session.set_state(SessionState::Detached);
            }
            session.touch();
        }
    }

    pub async fn write_stdin(&self, id: &str, data: Vec<u8>) -> Result<(), TerminalError> {
        let session = self.get(id).ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        session.touch();
        session.pty.write(data).await;
        Ok(())
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let session = self.get(id).ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        session.pty.resize(cols, rows).await;
        Ok(())
    }

    pub fn list(&self, instance_name: &str, active_only: bool) -> Vec<TerminalSummary> {
        self.sessions
            .iter()
            .filter(|e| e.value().instance_name == instance_name)
            .map(|e| e.value().summary())
            .filter(|s| !active_only || s.state == SessionState::Active)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub async fn close(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.pty.close().await;
            session.set_state(SessionState::Closed);
            *session.client_tx.write() = None;
            if let Some(task) = session.pump_task.lock().take() {
                task.abort();
            }
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub async fn close_all_for_instance(&self, instance_name: &str) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().instance_name == instance_name)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    /// Closes every `detached` session idle longer than the configured
    /// timeout. Returns how many were closed.
    pub async fn cleanup_idle(&self) -> usize {
        let idle_timeout = self.config.terminal.idle_timeout();
        let now = Utc::now();

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| {
                let s = e.value();
                s.state() == SessionState::Detached
                    && now.signed_duration_since(*s.last_activity_at.read())
                        > chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::zero())
            })
            .map(|e| e.key().clone())
            .collect();

        let count = stale.len();
        for id in stale {
            self.close(&id).await;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::external::InMemoryStore;

    fn test_manager() -> Arc<TerminalManager> {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let pool = ConnectionPool::new(Config::default(), store, audit);
        TerminalManager::new(pool, Config::default())
    }

    #[tokio::test]
    async fn create_rejects_shells_outside_the_allow_list() {
        let manager = test_manager();
        let result = manager.create("bot-1", "alice", "fish").await;
        assert!(matches!(result, Err(TerminalError::InvalidShell(_))));
    }

    #[tokio::test]
    async fn create_fails_fast_when_instance_has_no_connection() {
        let manager = test_manager();
        let result = manager.create("bot-1", "alice", "bash").await;
        assert!(matches!(result, Err(TerminalError::NotConnected(_))));
    }

    #[tokio::test]
    async fn empty_manager_reports_nothing() {
        let manager = test_manager();
        assert_eq!(manager.active_count(), 0);
        assert!(manager.list("bot-1", false).is_empty());
        assert_eq!(manager.cleanup_idle().await, 0);
        manager.close_all_for_instance("bot-1").await;
        manager.close("nope").await;
    }
}
