//! Process-wide service bundle (spec §9: "model these as explicit
//! process-scoped services created at startup and threaded through
//! constructors; do not hide lifetime in a global").
//!
//! `Services` owns one instance of every component and is handed to the HTTP
//! proxy router and the maintenance loops alike, so both surfaces talk to
//! the exact same pool/tunnel-manager/terminal-manager/audit-log.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::external::{Authorizer, Orchestrator, Store};
use crate::key::KeyStore;
use crate::ops::{FileClient, LogClient};
use crate::pool::ConnectionPool;
use crate::terminal::TerminalManager;
use crate::tunnel::TunnelManager;

pub struct Services {
    pub config: Config,
    pub pool: Arc<ConnectionPool>,
    pub tunnels: Arc<TunnelManager>,
    pub terminals: Arc<TerminalManager>,
    pub files: Arc<FileClient>,
    pub logs: Arc<LogClient>,
    pub audit: Arc<AuditLog>,
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub authorizer: Arc<dyn Authorizer>,
    pub key_store: Arc<KeyStore>,
    pub http_client: reqwest::Client,
}

impl Services {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        orchestrator: Arc<dyn Orchestrator>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Arc<Self> {
        let audit = Arc::new(AuditLog::new(store.clone()));
        let pool = ConnectionPool::new(config.clone(), store.clone(), audit.clone());
        let tunnels = TunnelManager::new(pool.clone(), config.clone());
        let terminals = TerminalManager::new(pool.clone(), config.clone());
        let files = Arc::new(FileClient::new(pool.clone(), audit.clone(), config.ops_exec_timeout()));
        let logs = Arc::new(LogClient::new(pool.clone(), config.ops_exec_timeout()));
        let key_store = Arc::new(KeyStore::new(config.key_directory.clone()));

        // Loopback-only client: short dial timeout, streaming bodies, no
        // artificial keepalive cap — matches spec §4.F's "stateless beyond a
        // single shared HTTP client configured for loopback".
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .pool_max_idle_per_host(usize::MAX)
            .build()
            .expect("reqwest client for loopback proxying");

        Arc::new(Self {
            config,
            pool,
            tunnels,
            terminals,
            files,
            logs,
            audit,
            store,
            orchestrator,
            authorizer,
            key_store,
            http_client,
        })
    }

    /// Cancels every background task and tears down every open connection,
    /// giving callers up to `grace` to finish before returning regardless
    /// (spec §5: "every task must exit within a 10 s grace period").
    pub async fn shutdown(&self, grace: Duration) {
        let close_all = async {
            self.tunnels.shutdown().await;
            self.pool.close_all().await;
        };
        if tokio::time::timeout(grace, close_all).await.is_err() {
            tracing::warn!("shutdown grace period elapsed before all connections closed");
        }
    }
}
