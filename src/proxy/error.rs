//! Maps the connectivity core's typed errors onto the HTTP status codes
//! enumerated in spec §6: 401 unauthenticated, 403 disallowed role/IP,
//! 404 unknown instance, 502 no tunnel/no connection/upstream unreachable,
//! 429 quota/rate-limit, otherwise 2xx/upstream-derived.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::external::StoreError;
use crate::ops::OpsError;
use crate::ssh::{ConnectError, ConnectErrorKind};
use crate::terminal::TerminalError;
use crate::tunnel::TunnelError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("too many requests")]
    RateLimited,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ProxyError::Forbidden(_) => StatusCode::FORBIDDEN,
            ProxyError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<StoreError> for ProxyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InstanceNotFound(name) => ProxyError::InstanceNotFound(name),
            StoreError::Backend(msg) => ProxyError::Internal(msg),
        }
    }
}

impl From<TunnelError> for ProxyError {
    fn from(e: TunnelError) -> Self {
        ProxyError::BadGateway(e.to_string())
    }
}

impl From<TerminalError> for ProxyError {
    fn from(e: TerminalError) -> Self {
        match e {
            TerminalError::NotConnected(_) => ProxyError::BadGateway(e.to_string()),
            TerminalError::InvalidShell(_) => ProxyError::BadRequest(e.to_string()),
            TerminalError::NotFound(_) => ProxyError::InstanceNotFound(e.to_string()),
            TerminalError::Pty(_) => ProxyError::BadGateway(e.to_string()),
        }
    }
}

impl From<OpsError> for ProxyError {
    fn from(e: OpsError) -> Self {
        match e {
            OpsError::NotConnected(_) => ProxyError::BadGateway(e.to_string()),
            OpsError::NotFound { .. } => ProxyError::InstanceNotFound(e.to_string()),
            OpsError::PermissionDenied { .. } => ProxyError::Forbidden(e.to_string()),
            OpsError::Io { .. } | OpsError::Exec(_) => ProxyError::Internal(e.to_string()),
        }
    }
}

impl From<ConnectError> for ProxyError {
    fn from(e: ConnectError) -> Self {
        match connect_error_status(e.kind()) {
            StatusCode::TOO_MANY_REQUESTS => ProxyError::RateLimited,
            StatusCode::FORBIDDEN => ProxyError::Forbidden(e.to_string()),
            _ => ProxyError::BadGateway(e.to_string()),
        }
    }
}

/// Maps a connect-path error kind to the status it should surface as, per
/// spec §7's error table (`dial`/`handshake`/`auth`/`timeout` → 502,
/// `rate_limited` → 429, `ip_not_allowed` → 403).
pub fn connect_error_status(kind: ConnectErrorKind) -> StatusCode {
    match kind {
        ConnectErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ConnectErrorKind::IpNotAllowed => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_GATEWAY,
    }
}
