use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("instance {0} not found")]
    NotFound(String),
    #[error("orchestrator call failed: {0}")]
    Failed(String),
}

/// The container orchestrator, deliberately out of scope for this crate:
/// creates/destroys agent containers and reports their status and SSH
/// reachability. Everything else about instance lifecycle (provisioning,
/// scaling, billing) lives on the other side of this trait.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn status(&self, name: &str) -> Result<InstanceStatus, OrchestratorError>;
    async fn ssh_endpoint(&self, name: &str) -> Result<SshEndpoint, OrchestratorError>;
}

/// Reports every known instance as `running`, reachable at a fixed host and
/// the instance record's own `sshPort`. Useful for standalone/local-dev runs
/// of the binary where there is no real orchestrator on the other side of
/// the trait; production deployments provide their own.
pub struct StaticOrchestrator {
    store: std::sync::Arc<dyn super::Store>,
    host: String,
}

impl StaticOrchestrator {
    pub fn new(store: std::sync::Arc<dyn super::Store>, host: impl Into<String>) -> Self {
        Self { store, host: host.into() }
    }
}

#[async_trait]
impl Orchestrator for StaticOrchestrator {
    async fn status(&self, name: &str) -> Result<InstanceStatus, OrchestratorError> {
        self.store
            .get_instance(name)
            .await
            .map(|_| InstanceStatus::Running)
            .map_err(|e| OrchestratorError::NotFound(e.to_string()))
    }

    async fn ssh_endpoint(&self, name: &str) -> Result<SshEndpoint, OrchestratorError> {
        let instance = self
            .store
            .get_instance(name)
            .await
            .map_err(|e| OrchestratorError::NotFound(e.to_string()))?;
        Ok(SshEndpoint {
            host: self.host.clone(),
            port: instance.ssh_port,
        })
    }
}
