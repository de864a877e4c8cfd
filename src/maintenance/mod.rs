//! Maintenance Loops (spec component 4.H): periodic reconciliation of
//! desired vs actual tunnel state, scheduled key rotation, and scheduled
//! audit pruning. Grounded on the teacher's `session/auto_reconnect.rs` loop
//! shape (a spawned task looping on a timer) and on `pool::reconnect`'s
//! `tokio::spawn` + `tokio::time::sleep` idiom already used in this crate,
//! generalized from "one task per connection" to "one task per maintenance
//! concern, process-wide".

mod audit_retention;
mod key_rotation;
mod tunnels;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::app::Services;

/// Owns the three background maintenance tasks. Dropping this without
/// calling `shutdown` leaves the tasks running; `shutdown` is the intended
/// teardown path, called once from `main`'s signal handler.
pub struct MaintenanceHandle {
    cancel: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Starts all three maintenance loops against `services`. Each is an
/// independently schedulable task per spec §5; a failure or panic in one
/// does not affect the others.
pub fn spawn(services: Arc<Services>) -> MaintenanceHandle {
    let (cancel, _) = broadcast::channel(1);

    let tasks = vec![
        tokio::spawn(tunnels::run(services.clone(), cancel.subscribe())),
        tokio::spawn(key_rotation::run(services.clone(), cancel.subscribe())),
        tokio::spawn(audit_retention::run(services, cancel.subscribe())),
    ];

    info!("maintenance loops started");
    MaintenanceHandle { cancel, tasks }
}

impl MaintenanceHandle {
    /// Signals every loop to stop and waits for them to exit.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        info!("maintenance loops stopped");
    }
}
