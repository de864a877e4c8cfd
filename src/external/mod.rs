//! External Contracts (spec component 4.I): the collaborators this crate
//! assumes but does not implement — the container orchestrator, the
//! persistent store, and HTTP authn/authz. Only trait seams live here, plus
//! an in-memory `Store` fixture useful for tests and local development.

mod auth;
mod orchestrator;
mod store;

pub use auth::Authorizer;
pub use orchestrator::{InstanceStatus, Orchestrator, OrchestratorError, SshEndpoint, StaticOrchestrator};
pub use store::{
    AuditEventKind, AuditQuery, AuditQueryResult, AuditRecordData, InMemoryStore, InstanceRecord, Store, StoreError,
};
