use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::pty::PtyController;
use super::recording::Recorder;
use super::scrollback::ScrollbackBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Detached,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Detached => "detached",
            SessionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminalSummary {
    pub id: String,
    pub instance_name: String,
    pub user_id: String,
    pub shell: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// One interactive PTY session multiplexed over an instance's SSH session.
/// The pump task (spawned alongside this struct, see `pty::spawn_pty_pump`)
/// is the single owner of the `Channel`; everything else talks to it
/// through `pty` or reads the tee'd output from `scrollback`.
pub struct TerminalSession {
    pub id: String,
    pub instance_name: String,
    pub user_id: String,
    pub shell: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: RwLock<DateTime<Utc>>,
    state: RwLock<SessionState>,
    pub scrollback: ScrollbackBuffer,
    pub recorder: Option<Recorder>,
    pub(super) client_tx: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
    pub pty: PtyController,
    pub(super) pump_task: Mutex<Option<JoinHandle<()>>>,
}

impl TerminalSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        instance_name: String,
        user_id: String,
        shell: String,
        scrollback_capacity: usize,
        recording: bool,
        pty: PtyController,
    ) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            id,
            instance_name,
            user_id,
            shell,
            created_at: now,
            last_activity_at: RwLock::new(now),
            state: RwLock::new(SessionState::Active),
            scrollback: ScrollbackBuffer::new(scrollback_capacity),
            recorder: if recording { Some(Recorder::new()) } else { None },
            client_tx: RwLock::new(None),
            pty,
            pump_task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn touch(&self) {
        *self.last_activity_at.write() = Utc::now();
    }

    pub fn summary(&self) -> TerminalSummary {
        TerminalSummary {
            id: self.id.clone(),
            instance_name: self.instance_name.clone(),
            user_id: self.user_id.clone(),
            shell: self.shell.clone(),
            state: self.state(),
            created_at: self.created_at,
            last_activity_at: *self.last_activity_at.read(),
        }
    }
}
