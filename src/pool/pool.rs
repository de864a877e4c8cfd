use std::sync::Arc;

use dashmap::DashMap;
use russh::keys::PrivateKey;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditLog};
use crate::config::Config;
use crate::external::{AuditEventKind, Store};
use crate::ssh::{self, ConnectError, ConnectErrorKind, FingerprintVerifier, HandleController};

use super::connection::{Connection, DialParams};
use super::keepalive::spawn_keepalive_task;
use super::ratelimit::RateLimiter;
use super::reconnect::spawn_reconnect_loop;
use super::state::{ConnectionEvent, ConnectionState, ConnectionStatus};
use super::verifier::StoreFingerprintVerifier;

pub const MAX_EVENT_RING_LEN: usize = 200;

/// Owns at most one live SSH session per instance (spec component 4.B).
pub struct ConnectionPool {
    connections: DashMap<String, Arc<Connection>>,
    config: Config,
    audit: Arc<AuditLog>,
    verifier: Arc<dyn FingerprintVerifier>,
    rate_limiter: RateLimiter,
}

impl ConnectionPool {
    pub fn new(config: Config, store: Arc<dyn Store>, audit: Arc<AuditLog>) -> Arc<Self> {
        let rate_limiter = RateLimiter::new(config.rate_limit_connections_per_minute);
        Arc::new(Self {
            connections: DashMap::new(),
            verifier: Arc::new(StoreFingerprintVerifier::new(store)),
            config,
            audit,
            rate_limiter,
        })
    }

    fn entry(&self, name: &str) -> Arc<Connection> {
        self.connections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Connection::new(name.to_string())))
            .clone()
    }

    /// Idempotent: returns the existing session if already `connected`,
    /// otherwise dials, blocking up to the configured connect timeout.
    /// `source_ip` is the caller's observed source address, used for rate
    /// limiting and the instance's optional `allowedSourceIPs` check.
    pub async fn ensure(
        self: &Arc<Self>,
        name: &str,
        host: &str,
        port: u16,
        username: &str,
        signer: Arc<PrivateKey>,
        source_ip: &str,
        allowed_source_ips: Option<&[String]>,
    ) -> Result<HandleController, ConnectError> {
        let conn = self.entry(name);
        let _guard = conn.connect_lock.lock().await;

        if conn.state() == ConnectionState::Connected {
            if let Some(controller) = conn.controller() {
                return Ok(controller);
            }
        }

        if let Some(allowed) = allowed_source_ips {
            if !allowed.is_empty() && !allowed.iter().any(|cidr| ip_in_cidr(source_ip, cidr)) {
                self.audit_fire_and_forget(name, AuditEventKind::ConnectionFailed, "ip_not_allowed".to_string());
                return Err(ConnectError::IpNotAllowed {
                    instance: name.to_string(),
                    source_ip: source_ip.to_string(),
                });
            }
        }

        if !self.rate_limiter.try_acquire(source_ip, name) {
            self.audit_fire_and_forget(name, AuditEventKind::ConnectionFailed, "rate_limited".to_string());
            return Err(ConnectError::RateLimited {
                instance: name.to_string(),
            });
        }

        let params = DialParams {
            host: host.to_string(),
            port,
            username: username.to_string(),
            signer,
        };
        conn.set_dial_params(params.clone());

        conn.set_state(ConnectionState::Connecting, None);
        match self.dial_and_attach(&conn, &params).await {
            Ok(()) => Ok(conn.controller().expect("just connected")),
            Err(e) => {
                conn.set_state(ConnectionState::Failed, Some(e.to_string()));
                if e.kind() == ConnectErrorKind::FingerprintMismatch {
                    self.audit_fire_and_forget(name, AuditEventKind::FingerprintMismatch, e.to_string());
                } else {
                    self.audit_fire_and_forget(name, AuditEventKind::ConnectionFailed, e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Dials, spawns the handle owner task and the keepalive task, and
    /// transitions the connection to `connected`. Used by both `ensure` and
    /// the reconnect loop.
    pub(super) async fn dial_and_attach(self: &Arc<Self>, conn: &Arc<Connection>, params: &DialParams) -> Result<(), ConnectError> {
        let handle = ssh::dial(
            conn.name.clone(),
            &params.host,
            params.port,
            &params.username,
            params.signer.clone(),
            self.config.ssh_connect_timeout(),
            self.config.keepalive_interval(),
            self.verifier.clone(),
        )
        .await?;

        let controller = ssh::spawn_handle_owner_task(handle, conn.name.clone());
        conn.set_connected(controller);
        self.audit_fire_and_forget(&conn.name, AuditEventKind::ConnectionEstablished, String::new());

        conn.reset_keepalive_cancel();
        let cancel = conn.keepalive_cancel_handle();
        let task = spawn_keepalive_task(self.clone(), conn.clone(), self.config.keepalive_interval(), cancel);
        conn.set_keepalive_task(task);

        Ok(())
    }

    pub(super) fn spawn_reconnect(self: &Arc<Self>, name: String) {
        let conn = self.entry(&name);
        spawn_reconnect_loop(self.clone(), conn, self.config.reconnect_policy());
    }

    /// Non-blocking lookup; does not dial.
    pub fn get(&self, name: &str) -> Option<HandleController> {
        self.connections.get(name).and_then(|c| c.controller())
    }

    /// O(1) state check plus the controller's own cheap liveness flag (its
    /// command channel is still open). Does not perform a fresh round-trip
    /// probe — that's the keepalive task's job, running every
    /// `keepalive_interval` regardless of callers.
    pub fn is_connected(&self, name: &str) -> bool {
        match self.connections.get(name) {
            Some(conn) => {
                if conn.state() != ConnectionState::Connected {
                    return false;
                }
                match conn.controller() {
                    Some(controller) if controller.is_connected() => true,
                    _ => {
                        conn.set_state(ConnectionState::Disconnected, Some("controller_gone".to_string()));
                        false
                    }
                }
            }
            None => false,
        }
    }

    /// Idempotent teardown: cancels the keepalive loop, disconnects, emits
    /// `connection_terminated`.
    pub async fn close(&self, name: &str) {
        let Some(conn) = self.connections.get(name).map(|c| c.clone()) else {
            return;
        };

        if conn.state() == ConnectionState::Disconnected {
            return;
        }

        conn.request_keepalive_stop();
        if let Some(controller) = conn.controller() {
            controller.disconnect().await;
        }
        conn.clear_controller();
        conn.set_state(ConnectionState::Disconnected, None);
        self.audit_fire_and_forget(name, AuditEventKind::ConnectionTerminated, String::new());
        info!(instance = %name, "connection closed");
    }

    pub async fn close_all(&self) {
        let names: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.close(&name).await;
        }
    }

    pub fn events(&self, name: &str) -> Vec<ConnectionEvent> {
        self.connections
            .get(name)
            .map(|c| c.events_snapshot())
            .unwrap_or_default()
    }

    /// A snapshot of an instance's connection for status endpoints. Returns
    /// `None` if the instance has never been `ensure`d.
    pub fn status(&self, name: &str) -> Option<ConnectionStatus> {
        let conn = self.connections.get(name)?;
        Some(ConnectionStatus {
            instance_name: name.to_string(),
            state: conn.state(),
            connected_at: *conn.connected_at.read(),
            last_health_check_at: *conn.last_health_check_at.read(),
            successful_checks: conn.successful_checks.load(std::sync::atomic::Ordering::SeqCst),
            failed_checks: conn.failed_checks.load(std::sync::atomic::Ordering::SeqCst),
            reconnect_attempts: conn.reconnect_attempts.load(std::sync::atomic::Ordering::SeqCst),
        })
    }

    pub(super) fn audit_fire_and_forget(&self, instance_name: &str, kind: AuditEventKind, details: String) {
        let audit = self.audit.clone();
        let instance_name = instance_name.to_string();
        tokio::spawn(async move {
            let entry = AuditEntry::new(instance_name.clone(), instance_name, kind).with_details(details);
            if let Err(e) = audit.log(entry).await {
                warn!(error = %e, "failed to write audit entry");
            }
        });
    }
}

/// Checks whether `source_ip` falls within `cidr` (`a.b.c.d` or
/// `a.b.c.d/nn`); on any parse failure the match fails closed.
fn ip_in_cidr(source_ip: &str, cidr: &str) -> bool {
    use std::net::IpAddr;

    let Ok(ip): Result<IpAddr, _> = source_ip.parse() else {
        return false;
    };

    let (network_str, prefix_len) = match cidr.split_once('/') {
        Some((net, len)) => (net, len.parse::<u32>().unwrap_or(32)),
        None => (cidr, if cidr.contains(':') { 128 } else { 32 }),
    };

    let Ok(network): Result<IpAddr, _> = network_str.parse() else {
        return false;
    };

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len.min(32)) };
            u32::from(ip) & mask == u32::from(net) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = if prefix_len == 0 { 0 } else { u128::MAX << (128 - prefix_len.min(128)) };
            u128::from(ip) & mask == u128::from(net) & mask
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryStore;

    fn test_pool() -> Arc<ConnectionPool> {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        ConnectionPool::new(Config::default(), store, audit)
    }

    #[tokio::test]
    async fn get_and_is_connected_are_false_for_unknown_instance() {
        let pool = test_pool();
        assert!(pool.get("nope").is_none());
        assert!(!pool.is_connected("nope"));
    }

    #[tokio::test]
    async fn close_on_unknown_instance_is_a_no_op() {
        let pool = test_pool();
        pool.close("nope").await;
    }

    #[test]
    fn cidr_matching() {
        assert!(ip_in_cidr("10.0.0.5", "10.0.0.0/24"));
        assert!(!ip_in_cidr("10.0.1.5", "10.0.0.0/24"));
        assert!(ip_in_cidr("10.0.0.5", "10.0.0.5"));
        assert!(!ip_in_cidr("not-an-ip", "10.0.0.0/24"));
    }
}
