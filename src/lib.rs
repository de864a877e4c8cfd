//! fleetssh — the SSH connectivity core for a fleet control plane.
//!
//! This crate owns, for every "running" managed instance, exactly one live
//! SSH session, the local tunnels forwarded over it, any interactive PTY
//! sessions layered on top, and the audit trail of what happened. It does not
//! own the instance lifecycle (that's the orchestrator), persistence (the
//! store), or HTTP authn/authz (the surrounding service) — see `external`.

pub mod app;
pub mod audit;
pub mod config;
pub mod external;
pub mod key;
pub mod maintenance;
pub mod ops;
pub mod pool;
pub mod proxy;
pub mod ssh;
pub mod terminal;
pub mod tunnel;

pub use config::Config;
