use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use russh::keys::PrivateKey;
use tokio::task::JoinHandle;

use crate::ssh::HandleController;

use super::state::{ConnectionEvent, ConnectionState, EventRing};

/// Parameters needed to (re)dial an instance, captured on the first
/// successful `ensure` so the reconnect loop can redial without the caller
/// supplying them again.
#[derive(Clone)]
pub struct DialParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub signer: Arc<PrivateKey>,
}

/// One instance's Connection Pool entry. `state` and `controller` are the
/// two fields readers outside the owning task ever touch; both are guarded
/// by `parking_lot::RwLock` so a reader never observes a torn pairing (per
/// the invariant that `session` is non-null iff `state == connected`).
pub struct Connection {
    pub name: String,
    state: parking_lot::RwLock<ConnectionState>,
    controller: parking_lot::RwLock<Option<HandleController>>,
    pub connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    pub last_health_check_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    pub successful_checks: AtomicU64,
    pub failed_checks: AtomicU64,
    pub reconnect_attempts: AtomicU32,
    events: Mutex<EventRing>,
    /// Serializes `ensure` so concurrent callers for the same instance never
    /// race into two simultaneous dials.
    pub(super) connect_lock: tokio::sync::Mutex<()>,
    keepalive_cancel: Arc<AtomicBool>,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
    pub(super) dial_params: parking_lot::RwLock<Option<DialParams>>,
}

impl Connection {
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            controller: parking_lot::RwLock::new(None),
            connected_at: parking_lot::RwLock::new(None),
            last_health_check_at: parking_lot::RwLock::new(None),
            successful_checks: AtomicU64::new(0),
            failed_checks: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            events: Mutex::new(EventRing::default()),
            connect_lock: tokio::sync::Mutex::new(()),
            keepalive_cancel: Arc::new(AtomicBool::new(false)),
            keepalive_task: Mutex::new(None),
            dial_params: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_dial_params(&self, params: DialParams) {
        *self.dial_params.write() = Some(params);
    }

    pub fn dial_params(&self) -> Option<DialParams> {
        self.dial_params.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ConnectionState, detail: Option<String>) {
        *self.state.write() = state;
        self.events.lock().push(state, detail);
    }

    pub fn controller(&self) -> Option<HandleController> {
        self.controller.read().clone()
    }

    pub fn set_connected(&self, controller: HandleController) {
        *self.controller.write() = Some(controller);
        *self.connected_at.write() = Some(Utc::now());
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected, None);
    }

    pub fn clear_controller(&self) {
        *self.controller.write() = None;
    }

    pub fn events_snapshot(&self) -> Vec<ConnectionEvent> {
        self.events.lock().snapshot()
    }

    pub fn keepalive_cancel_handle(&self) -> Arc<AtomicBool> {
        self.keepalive_cancel.clone()
    }

    pub fn reset_keepalive_cancel(&self) {
        self.keepalive_cancel.store(false, Ordering::SeqCst);
    }

    pub fn request_keepalive_stop(&self) {
        self.keepalive_cancel.store(true, Ordering::SeqCst);
        if let Some(task) = self.keepalive_task.lock().take() {
            task.abort();
        }
    }

    pub fn set_keepalive_task(&self, task: JoinHandle<()>) {
        *self.keepalive_task.lock() = Some(task);
    }
}
