use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::ssh::{exec_command, PingResult};

use super::connection::Connection;
use super::pool::ConnectionPool;
use super::state::ConnectionState;

/// Two probes per cycle: the SSH global request `keepalive@openssh.com`
/// (reply required), and an exec of `echo ping` whose stdout must equal
/// `"ping\n"` within 5s. Either failing transitions the connection to
/// `reconnecting`.
pub fn spawn_keepalive_task(
    pool: Arc<ConnectionPool>,
    conn: Arc<Connection>,
    interval: Duration,
    cancel: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            ticker.tick().await;
            if cancel.load(Ordering::SeqCst) {
                return;
            }

            let Some(controller) = conn.controller() else {
                return;
            };

            let healthy = probe_once(&controller).await;
            *conn.last_health_check_at.write() = Some(chrono::Utc::now());

            if healthy {
                conn.successful_checks.fetch_add(1, Ordering::SeqCst);
            } else {
                conn.failed_checks.fetch_add(1, Ordering::SeqCst);
                warn!(instance = %conn.name, "keepalive failed, transitioning to reconnecting");
                conn.set_state(ConnectionState::Reconnecting, Some("keepalive_failed".to_string()));
                pool.spawn_reconnect(conn.name.clone());
                return;
            }
        }
    })
}

async fn probe_once(controller: &crate::ssh::HandleController) -> bool {
    if !matches!(controller.ping().await, PingResult::Ok) {
        return false;
    }

    match exec_command(controller, "echo ping", Duration::from_secs(5)).await {
        Ok(result) => result.stdout_string() == "ping\n",
        Err(_) => false,
    }
}
