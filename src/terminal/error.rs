use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("instance {0} has no active connection")]
    NotConnected(String),

    #[error("shell {0:?} is not in the configured allow list")]
    InvalidShell(String),

    #[error("terminal session {0} not found")]
    NotFound(String),

    #[error("pty setup failed: {0}")]
    Pty(#[from] russh::Error),
}
