use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::pool::ConnectionPool;
use crate::ssh::HandleController;

use super::error::TunnelError;
use super::listener::run_accept_loop;
use super::monitor::{run_global_probe_loop, run_instance_monitor};
use super::types::{bound_local_port, Tunnel, TunnelMetrics, TunnelService, TunnelSnapshot};

struct InstanceMonitor {
    cancel_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Opens, health-checks, and recreates the per-instance local port forwards
/// (spec component 4.C). One `TunnelManager` is shared process-wide; it owns
/// one background monitor task per instance that has been `start`ed, plus a
/// single global probe loop.
pub struct TunnelManager {
    pub(super) pool: Arc<ConnectionPool>,
    pub(super) config: Config,
    tunnels: DashMap<(String, TunnelService), Arc<Tunnel>>,
    monitors: DashMap<String, InstanceMonitor>,
    reconnection_counts: DashMap<String, Arc<AtomicU64>>,
    probe_cancel: broadcast::Sender<()>,
    probe_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

pub(super) const WELL_KNOWN_SERVICES: [TunnelService; 2] = [TunnelService::Vnc, TunnelService::Gateway];

impl TunnelManager {
    pub fn new(pool: Arc<ConnectionPool>, config: Config) -> Arc<Self> {
        let (probe_cancel, _) = broadcast::channel(1);
        let manager = Arc::new(Self {
            pool,
            config,
            tunnels: DashMap::new(),
            monitors: DashMap::new(),
            reconnection_counts: DashMap::new(),
            probe_cancel,
            probe_task: parking_lot::Mutex::new(None),
        });

        let probe_manager = manager.clone();
        let probe_rx = manager.probe_cancel.subscribe();
        let task = tokio::spawn(run_global_probe_loop(probe_manager, probe_rx));
        *manager.probe_task.lock() = Some(task);

        manager
    }

    /// Opens (or confirms already-open) tunnels for every well-known service
    /// on `instance_name` and starts its monitor task. If any tunnel opened
    /// during this call fails, every tunnel this call opened is torn down
    /// and the error is returned; tunnels that were already open before this
    /// call are left untouched.
    pub async fn start(self: &Arc<Self>, instance_name: &str) -> Result<(), TunnelError> {
        let controller = self
            .pool
            .get(instance_name)
            .ok_or_else(|| TunnelError::NotConnected(instance_name.to_string()))?;

        self.ensure_monitor(instance_name.to_string());

        let mut opened_this_call: Vec<TunnelService> = Vec::new();

        for service in WELL_KNOWN_SERVICES {
            if self.has_open_tunnel(instance_name, service) {
                continue;
            }
            match self.open_tunnel(instance_name, service, controller.clone()).await {
                Ok(_) => opened_this_call.push(service),
                Err(e) => {
                    for done in opened_this_call {
                        self.close_one(instance_name, done);
                    }
                    warn!(instance = instance_name, error = %e, "tunnel start failed, rolled back");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Closes every tunnel for `instance_name` and stops its monitor task.
    pub fn stop(&self, instance_name: &str) {
        if let Some((_, monitor)) = self.monitors.remove(instance_name) {
            let _ = monitor.cancel_tx.send(());
            monitor.task.abort();
        }

        for service in WELL_KNOWN_SERVICES {
            self.close_one(instance_name, service);
        }
        // Custom tunnels, if any, are owner-managed; close whatever remains.
        let remaining: Vec<TunnelService> = self
            .tunnels
            .iter()
            .filter(|e| e.key().0 == instance_name)
            .map(|e| e.key().1)
            .collect();
        for service in remaining {
            self.close_one(instance_name, service);
        }

        info!(instance = instance_name, "tunnels stopped");
    }

    pub fn tunnels(&self, instance_name: &str) -> Vec<TunnelSnapshot> {
        self.tunnels
            .iter()
            .filter(|e| e.key().0 == instance_name)
            .map(|e| e.value().snapshot())
            .collect()
    }

    pub fn all_tunnels(&self) -> HashMap<String, Vec<TunnelSnapshot>> {
        let mut out: HashMap<String, Vec<TunnelSnapshot>> = HashMap::new();
        for entry in self.tunnels.iter() {
            out.entry(entry.key().0.clone()).or_default().push(entry.value().snapshot());
        }
        out
    }

    /// Immediate TCP probe of a single tunnel's local port, independent of
    /// the periodic global probe loop.
    pub async fn check_health(&self, instance_name: &str, service: TunnelService) -> Result<TunnelMetrics, TunnelError> {
        let tunnel = self
            .tunnels
            .get(&(instance_name.to_string(), service))
            .map(|e| e.value().clone())
            .ok_or_else(|| TunnelError::NotConnected(instance_name.to_string()))?;

        let addr = format!("127.0.0.1:{}", tunnel.local_port);
        match tokio::time::timeout(self.config.tunnel_probe_timeout(), tokio::net::TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => tunnel.record_check(None),
            Ok(Err(e)) => tunnel.record_check(Some(e.to_string())),
            Err(_) => tunnel.record_check(Some("probe timed out".to_string())),
        }

        Ok(tunnel.snapshot().metrics)
    }

    pub fn metrics(&self, instance_name: &str) -> Vec<(TunnelService, TunnelMetrics)> {
        self.tunnels
            .iter()
            .filter(|e| e.key().0 == instance_name)
            .map(|e| (e.key().1, e.value().snapshot().metrics))
            .collect()
    }

    /// Count of tunnels successfully recreated after having gone missing.
    /// Does not count the initial `start` open.
    pub fn reconnection_count(&self, instance_name: &str) -> u64 {
        self.reconnection_counts
            .get(instance_name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Stops every monitor, the global probe loop, and closes all tunnels.
    pub async fn shutdown(&self) {
        let _ = self.probe_cancel.send(());
        if let Some(task) = self.probe_task.lock().take() {
            task.abort();
        }

        let instances: Vec<String> = self.monitors.iter().map(|e| e.key().clone()).collect();
        for instance in instances {
            self.stop(&instance);
        }

        let remaining: Vec<(String, TunnelService)> = self.tunnels.iter().map(|e| e.key().clone()).collect();
        for (instance, service) in remaining {
            self.close_one(&instance, service);
        }
    }

    pub(super) fn has_open_tunnel(&self, instance_name: &str, service: TunnelService) -> bool {
        self.tunnels
            .get(&(instance_name.to_string(), service))
            .map(|t| !t.is_closed())
            .unwrap_or(false)
    }

    pub(super) fn drop_closed_tunnels(&self, instance_name: &str) {
        self.tunnels.retain(|k, v| !(k.0 == instance_name && v.is_closed()));
    }

    pub(super) fn all_open_tunnels(&self) -> Vec<Arc<Tunnel>> {
        self.tunnels.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn note_reconnection(&self, instance_name: &str) {
        self.reconnection_counts
            .entry(instance_name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(super) async fn open_tunnel(
        &self,
        instance_name: &str,
        service: TunnelService,
        controller: HandleController,
    ) -> Result<Arc<Tunnel>, TunnelError> {
        let remote_port = service.default_remote_port().expect("well-known service has a default port");

        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| TunnelError::ListenerBind {
            instance: instance_name.to_string(),
            service: service.as_str().to_string(),
            source: e,
        })?;
        let local_port = bound_local_port(&listener).map_err(|e| TunnelError::ListenerBind {
            instance: instance_name.to_string(),
            service: service.as_str().to_string(),
            source: e,
        })?;

        let tunnel = Arc::new(Tunnel::new(instance_name.to_string(), service, remote_port, local_port));

        let cancel_rx = self
            .monitors
            .get(instance_name)
            .map(|m| m.cancel_tx.subscribe())
            .unwrap_or_else(|| self.probe_cancel.subscribe());

        let accept_task = tokio::spawn(run_accept_loop(listener, controller, tunnel.clone(), cancel_rx));
        *tunnel.accept_task.write() = Some(accept_task);

        self.tunnels.insert((instance_name.to_string(), service), tunnel.clone());
        info!(instance = instance_name, service = service.as_str(), local_port, remote_port, "tunnel opened");

        Ok(tunnel)
    }

    fn close_one(&self, instance_name: &str, service: TunnelService) {
        if let Some((_, tunnel)) = self.tunnels.remove(&(instance_name.to_string(), service)) {
            tunnel.mark_closed();
            if let Some(task) = tunnel.accept_task.write().take() {
                task.abort();
            }
        }
    }

    fn ensure_monitor(self: &Arc<Self>, instance_name: String) {
        if self.monitors.contains_key(&instance_name) {
            return;
        }
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let manager = self.clone();
        let name_for_task = instance_name.clone();
        let task = tokio::spawn(async move {
            run_instance_monitor(manager, name_for_task, cancel_rx).await;
        });
        self.monitors.insert(instance_name, InstanceMonitor { cancel_tx, task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::external::InMemoryStore;

    fn test_manager() -> Arc<TunnelManager> {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let pool = ConnectionPool::new(Config::default(), store, audit);
        TunnelManager::new(pool, Config::default())
    }

    #[tokio::test]
    async fn start_fails_fast_when_instance_has_no_connection() {
        let manager = test_manager();
        let result = manager.start("bot-1").await;
        assert!(matches!(result, Err(TunnelError::NotConnected(_))));
        assert!(manager.tunnels("bot-1").is_empty());
    }

    #[tokio::test]
    async fn stop_on_unknown_instance_is_a_no_op() {
        let manager = test_manager();
        manager.stop("nope");
        assert!(manager.all_tunnels().is_empty());
    }

    #[tokio::test]
    async fn reconnection_count_defaults_to_zero() {
        let manager = test_manager();
        assert_eq!(manager.reconnection_count("bot-1"), 0);
    }

    #[tokio::test]
    async fn shutdown_on_empty_manager_is_a_no_op() {
        let manager = test_manager();
        manager.shutdown().await;
    }
}
