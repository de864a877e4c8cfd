use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Well-known agent-side services a tunnel can forward to. `Custom` tunnels
/// are operator-managed and are never auto-recreated by the per-instance
/// monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelService {
    Vnc,
    Gateway,
    Custom,
}

impl TunnelService {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelService::Vnc => "vnc",
            TunnelService::Gateway => "gateway",
            TunnelService::Custom => "custom",
        }
    }

    /// The well-known remote port on the agent side for built-in services.
    pub fn default_remote_port(&self) -> Option<u16> {
        match self {
            TunnelService::Vnc => Some(3000),
            TunnelService::Gateway => Some(8080),
            TunnelService::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TunnelMetrics {
    pub bytes_transferred: u64,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TunnelSnapshot {
    pub instance_name: String,
    pub service: TunnelService,
    pub remote_port: u16,
    pub local_port: u16,
    pub created_at: DateTime<Utc>,
    pub metrics: TunnelMetrics,
    pub closed: bool,
}

/// A single local-bound listener forwarded to an agent port over the
/// instance's SSH session.
pub struct Tunnel {
    pub instance_name: String,
    pub service: TunnelService,
    pub remote_port: u16,
    pub local_port: u16,
    pub created_at: DateTime<Utc>,
    pub last_check_at: RwLock<Option<DateTime<Utc>>>,
    pub last_error: RwLock<Option<String>>,
    pub bytes_transferred: AtomicU64,
    closed: AtomicBool,
    pub(super) accept_task: RwLock<Option<JoinHandle<()>>>,
}

impl Tunnel {
    pub fn new(instance_name: String, service: TunnelService, remote_port: u16, local_port: u16) -> Self {
        Self {
            instance_name,
            service,
            remote_port,
            local_port,
            created_at: Utc::now(),
            last_check_at: RwLock::new(None),
            last_error: RwLock::new(None),
            bytes_transferred: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            accept_task: RwLock::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Once-only: returns `true` if this call is the one that closed it.
    pub fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn record_check(&self, error: Option<String>) {
        *self.last_check_at.write() = Some(Utc::now());
        *self.last_error.write() = error;
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TunnelSnapshot {
        TunnelSnapshot {
            instance_name: self.instance_name.clone(),
            service: self.service,
            remote_port: self.remote_port,
            local_port: self.local_port,
            created_at: self.created_at,
            metrics: TunnelMetrics {
                bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
                last_check_at: *self.last_check_at.read(),
                last_error: self.last_error.read().clone(),
            },
            closed: self.is_closed(),
        }
    }
}

pub(super) fn bound_local_port(listener: &TcpListener) -> std::io::Result<u16> {
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_closed_is_once_only() {
        let tunnel = Tunnel::new("bot-1".to_string(), TunnelService::Vnc, 3000, 40123);
        assert!(!tunnel.is_closed());
        assert!(tunnel.mark_closed());
        assert!(tunnel.is_closed());
        assert!(!tunnel.mark_closed());
    }

    #[test]
    fn snapshot_reflects_recorded_check_and_bytes() {
        let tunnel = Tunnel::new("bot-1".to_string(), TunnelService::Gateway, 8080, 40124);
        tunnel.add_bytes(128);
        tunnel.record_check(Some("boom".to_string()));

        let snap = tunnel.snapshot();
        assert_eq!(snap.metrics.bytes_transferred, 128);
        assert_eq!(snap.metrics.last_error.as_deref(), Some("boom"));
        assert!(snap.metrics.last_check_at.is_some());
        assert!(!snap.closed);
    }

    #[test]
    fn default_remote_ports_match_well_known_services() {
        assert_eq!(TunnelService::Vnc.default_remote_port(), Some(3000));
        assert_eq!(TunnelService::Gateway.default_remote_port(), Some(8080));
        assert_eq!(TunnelService::Custom.default_remote_port(), None);
    }
}
