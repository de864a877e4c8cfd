use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read or write key material at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse or encode key material: {0}")]
    Format(String),

    #[error("remote key install failed for {name}: {reason}")]
    RemoteInstall { name: String, reason: String },

    #[error("rotation for {name} aborted: {reason}")]
    RotationAborted { name: String, reason: String },
}

impl From<russh::keys::Error> for KeyError {
    fn from(e: russh::keys::Error) -> Self {
        KeyError::Format(e.to_string())
    }
}
