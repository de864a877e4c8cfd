//! Structured connect-path error with a `kind()` accessor instead of
//! string-sniffing, per the error table in the connection design.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    Dial,
    Handshake,
    Auth,
    Timeout,
    Canceled,
    RateLimited,
    IpNotAllowed,
    FingerprintMismatch,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("authentication to {addr} as {user} failed: {reason}")]
    Auth {
        addr: String,
        user: String,
        reason: String,
    },

    #[error("connect to {addr} timed out after {timeout_secs}s")]
    Timeout { addr: String, timeout_secs: u64 },

    #[error("connect attempt canceled")]
    Canceled,

    #[error("too many connection attempts for {instance}")]
    RateLimited { instance: String },

    #[error("source IP {source_ip} is not in the allowed list for {instance}")]
    IpNotAllowed { instance: String, source_ip: String },

    #[error("host key fingerprint mismatch for {instance}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        instance: String,
        expected: String,
        actual: String,
    },

    #[error("SSH protocol error: {0}")]
    Protocol(String),
}

impl ConnectError {
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            ConnectError::Dial { .. } => ConnectErrorKind::Dial,
            ConnectError::Handshake { .. } => ConnectErrorKind::Handshake,
            ConnectError::Auth { .. } => ConnectErrorKind::Auth,
            ConnectError::Timeout { .. } => ConnectErrorKind::Timeout,
            ConnectError::Canceled => ConnectErrorKind::Canceled,
            ConnectError::RateLimited { .. } => ConnectErrorKind::RateLimited,
            ConnectError::IpNotAllowed { .. } => ConnectErrorKind::IpNotAllowed,
            ConnectError::FingerprintMismatch { .. } => ConnectErrorKind::FingerprintMismatch,
            ConnectError::Protocol(_) => ConnectErrorKind::Handshake,
        }
    }

    /// Whether the connect-path retry policy should back off and try again.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ConnectErrorKind::Dial | ConnectErrorKind::Handshake | ConnectErrorKind::Auth | ConnectErrorKind::Timeout
        )
    }
}

impl From<russh::Error> for ConnectError {
    fn from(err: russh::Error) -> Self {
        ConnectError::Protocol(err.to_string())
    }
}

impl From<russh::keys::Error> for ConnectError {
    fn from(err: russh::keys::Error) -> Self {
        ConnectError::Protocol(err.to_string())
    }
}
