//! Key Store (spec component 4.A): per-instance SSH key-pair lifecycle.
//!
//! One Ed25519 key pair per instance, persisted under a configured base
//! directory with owner-only permissions. Fingerprints are the canonical
//! `SHA256:<base64>` form `russh::keys` renders directly, so nothing here
//! hand-rolls a sha2/base64 pairing.

mod error;
mod installer;
mod store;

pub use error::KeyError;
pub use installer::SshKeyInstaller;
pub use store::{KeyStore, RemoteKeyInstaller, RotationOutcome};
