use thiserror::Error;

use crate::ssh::ExecError;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("instance {0} has no active connection")]
    NotConnected(String),

    #[error("{path}: not found")]
    NotFound { path: String },

    #[error("{path}: permission denied")]
    PermissionDenied { path: String },

    #[error("{path}: {detail}")]
    Io { path: String, detail: String },

    #[error("ssh exec failed: {0}")]
    Exec(#[from] ExecError),
}

/// Classifies a failed `cat`/`mkdir`/`ls` invocation's stderr the way spec
/// §4.E specifies: `No such file` → not found, `Permission denied` →
/// permission denied, anything else → generic io.
pub fn classify_failure(path: &str, stderr: &str) -> OpsError {
    if stderr.contains("No such file") {
        OpsError::NotFound { path: path.to_string() }
    } else if stderr.contains("Permission denied") {
        OpsError::PermissionDenied { path: path.to_string() }
    } else {
        OpsError::Io {
            path: path.to_string(),
            detail: stderr.trim().to_string(),
        }
    }
}
