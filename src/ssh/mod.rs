//! Low-level SSH dialing, host-key verification, and the single-owner
//! handle actor. This module knows nothing about instances or tunnels —
//! that lives in [`crate::pool`] and [`crate::tunnel`], which compose these
//! primitives per instance.

pub mod client;
pub mod error;
pub mod exec;
pub mod handle_owner;

pub use client::{dial, ClientHandler, FingerprintVerdict, FingerprintVerifier};
pub use error::{ConnectError, ConnectErrorKind};
pub use exec::{exec as exec_command, ExecError, ExecResult};
pub use handle_owner::{spawn_handle_owner_task, HandleController, PingResult};
