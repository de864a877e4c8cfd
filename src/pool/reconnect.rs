use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::ReconnectPolicy;
use crate::external::AuditEventKind;
use crate::ssh::ConnectErrorKind;

use super::connection::Connection;
use super::pool::ConnectionPool;
use super::state::ConnectionState;

/// Applies ±20% jitter to a computed backoff delay.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

/// Up to `policy.max_attempts` reconnect attempts with exponential backoff,
/// resetting the attempt counter on success. Each attempt emits a
/// `reconnect_attempt` audit event; exhaustion leaves the connection
/// `failed`.
pub fn spawn_reconnect_loop(pool: Arc<ConnectionPool>, conn: Arc<Connection>, policy: ReconnectPolicy) {
    tokio::spawn(async move {
        let Some(params) = conn.dial_params() else {
            warn!(instance = %conn.name, "no dial parameters on file; cannot reconnect");
            conn.set_state(ConnectionState::Failed, Some("no_dial_params".to_string()));
            return;
        };

        loop {
            let attempt = conn.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > policy.max_attempts {
                warn!(instance = %conn.name, attempts = attempt - 1, "reconnect attempts exhausted");
                conn.set_state(ConnectionState::Failed, Some("reconnect_attempts_exhausted".to_string()));
                return;
            }

            pool.audit_fire_and_forget(
                &conn.name,
                AuditEventKind::ReconnectAttempt,
                format!("attempt {attempt}"),
            );

            let delay = jittered(policy.delay_for_attempt(attempt));
            info!(instance = %conn.name, attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect attempt");
            tokio::time::sleep(delay).await;

            match pool.dial_and_attach(&conn, &params).await {
                Ok(()) => {
                    info!(instance = %conn.name, attempt, "reconnected");
                    pool.audit_fire_and_forget(&conn.name, AuditEventKind::ConnectionEstablished, "reconnected".to_string());
                    return;
                }
                Err(e) => {
                    warn!(instance = %conn.name, attempt, error = %e, "reconnect attempt failed");
                    if e.kind() == ConnectErrorKind::FingerprintMismatch {
                        pool.audit_fire_and_forget(&conn.name, AuditEventKind::FingerprintMismatch, e.to_string());
                    }
                }
            }
        }
    });
}
