//! Admin/observability routes (spec §4.F, `ssh-*`/`tunnels`/`rotate-ssh-key`
//! rows): status, event history, a synchronous connect+exec+tunnel probe,
//! forced reconnect, fingerprint lookup, tunnel metrics, and key rotation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::Services;
use crate::external::AuditEventKind;
use crate::key::SshKeyInstaller;
use crate::pool::ConnectionState;
use crate::ssh::exec_command;

use super::auth::{authorize, resolve_instance};
use super::error::ProxyError;

#[derive(Serialize)]
struct TunnelStatusJson {
    service: &'static str,
    local_port: u16,
    remote_port: u16,
    healthy: bool,
    last_error: Option<String>,
}

#[derive(Serialize)]
pub struct SshStatusResponse {
    connection_state: &'static str,
    connected_at: Option<DateTime<Utc>>,
    last_health_check_at: Option<DateTime<Utc>>,
    successful_checks: u64,
    failed_checks: u64,
    reconnect_attempts: u32,
    tunnels: Vec<TunnelStatusJson>,
}

pub async fn ssh_status(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SshStatusResponse>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let status = services.pool.status(&instance.name);
    let tunnels = services
        .tunnels
        .tunnels(&instance.name)
        .into_iter()
        .map(|t| TunnelStatusJson {
            service: t.service.as_str(),
            local_port: t.local_port,
            remote_port: t.remote_port,
            healthy: !t.closed && t.metrics.last_error.is_none(),
            last_error: t.metrics.last_error,
        })
        .collect();

    Ok(Json(SshStatusResponse {
        connection_state: status.as_ref().map(|s| s.state.as_str()).unwrap_or("disconnected"),
        connected_at: status.as_ref().and_then(|s| s.connected_at),
        last_health_check_at: status.as_ref().and_then(|s| s.last_health_check_at),
        successful_checks: status.as_ref().map(|s| s.successful_checks).unwrap_or(0),
        failed_checks: status.as_ref().map(|s| s.failed_checks).unwrap_or(0),
        reconnect_attempts: status.as_ref().map(|s| s.reconnect_attempts).unwrap_or(0),
        tunnels,
    }))
}

#[derive(Serialize)]
struct EventJson {
    state: &'static str,
    detail: Option<String>,
    at: DateTime<Utc>,
}

pub async fn ssh_events(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<EventJson>>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let events = services
        .pool
        .events(&instance.name)
        .into_iter()
        .map(|e| EventJson {
            state: e.state.as_str(),
            detail: e.detail,
            at: e.at,
        })
        .collect();

    Ok(Json(events))
}

#[derive(Serialize)]
pub struct SshTestResponse {
    connected: bool,
    exec_ok: bool,
    tunnels_started: bool,
}

pub async fn ssh_test(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<SshTestResponse>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let endpoint = services
        .orchestrator
        .ssh_endpoint(&instance.name)
        .await
        .map_err(|e| ProxyError::BadGateway(e.to_string()))?;

    let key_path = instance
        .ssh_private_key_path
        .clone()
        .ok_or_else(|| ProxyError::BadRequest("instance has no private key on file".to_string()))?;
    let signer = services
        .key_store
        .load(&key_path)
        .await
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    let controller = services
        .pool
        .ensure(
            &instance.name,
            &endpoint.host,
            endpoint.port,
            "agent",
            Arc::new(signer),
            &addr.ip().to_string(),
            instance.allowed_source_ips.as_deref(),
        )
        .await?;

    let exec_result = exec_command(&controller, "echo fleetssh-probe", services.config.ops_exec_timeout()).await;
    let exec_ok = exec_result.map(|r| r.success()).unwrap_or(false);

    let tunnels_started = services.tunnels.start(&instance.name).await.is_ok();

    Ok(Json(SshTestResponse {
        connected: true,
        exec_ok,
        tunnels_started,
    }))
}

pub async fn ssh_reconnect(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<SshTestResponse>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    services.tunnels.stop(&instance.name);
    services.pool.close(&instance.name).await;

    let endpoint = services
        .orchestrator
        .ssh_endpoint(&instance.name)
        .await
        .map_err(|e| ProxyError::BadGateway(e.to_string()))?;
    let key_path = instance
        .ssh_private_key_path
        .clone()
        .ok_or_else(|| ProxyError::BadRequest("instance has no private key on file".to_string()))?;
    let signer = services
        .key_store
        .load(&key_path)
        .await
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    services
        .pool
        .ensure(
            &instance.name,
            &endpoint.host,
            endpoint.port,
            "agent",
            Arc::new(signer),
            &addr.ip().to_string(),
            instance.allowed_source_ips.as_deref(),
        )
        .await?;

    let tunnels_started = services.tunnels.start(&instance.name).await.is_ok();

    Ok(Json(SshTestResponse {
        connected: true,
        exec_ok: true,
        tunnels_started,
    }))
}

#[derive(Serialize)]
pub struct FingerprintResponse {
    fingerprint: String,
    algorithm: &'static str,
    verified: bool,
}

pub async fn ssh_fingerprint(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FingerprintResponse>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let verified = services
        .pool
        .status(&instance.name)
        .map(|s| s.state == ConnectionState::Connected)
        .unwrap_or(false);

    Ok(Json(FingerprintResponse {
        fingerprint: instance.ssh_fingerprint.unwrap_or_default(),
        algorithm: "ssh-ed25519",
        verified,
    }))
}

#[derive(Serialize)]
struct TunnelMetricsJson {
    service: &'static str,
    local_port: u16,
    remote_port: u16,
    bytes_transferred: u64,
    last_check_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    closed: bool,
}

pub async fn tunnels(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<TunnelMetricsJson>>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let snapshots = services
        .tunnels
        .tunnels(&instance.name)
        .into_iter()
        .map(|t| TunnelMetricsJson {
            service: t.service.as_str(),
            local_port: t.local_port,
            remote_port: t.remote_port,
            bytes_transferred: t.metrics.bytes_transferred,
            last_check_at: t.metrics.last_check_at,
            last_error: t.metrics.last_error,
            closed: t.closed,
        })
        .collect();

    Ok(Json(snapshots))
}

#[derive(Serialize)]
pub struct RotateKeyResponse {
    fingerprint: String,
    rotated_at: DateTime<Utc>,
}

pub async fn rotate_ssh_key(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RotateKeyResponse>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let (old_public, old_path) = match (&instance.ssh_public_key, &instance.ssh_private_key_path) {
        (Some(public), Some(path)) => (public.clone(), path.clone()),
        _ => return Err(ProxyError::BadRequest("instance has no key material on file".to_string())),
    };

    let installer = SshKeyInstaller::new(services.pool.clone(), services.config.ops_exec_timeout());
    let outcome = services
        .key_store
        .rotate(&instance.name, &old_public, &old_path, &instance.name, &installer)
        .await
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    services
        .store
        .record_key_rotation(&instance.name, &outcome.new_public_key_openssh, &outcome.new_path, &outcome.new_fingerprint, outcome.rotated_at)
        .await?;

    services
        .audit
        .log(
            crate::audit::AuditEntry::new(instance.id.clone(), instance.name.clone(), AuditEventKind::KeyRotation)
                .with_details(format!("fingerprint={}", outcome.new_fingerprint)),
        )
        .await
        .ok();

    services.pool.close(&instance.name).await;

    Ok(Json(RotateKeyResponse {
        fingerprint: outcome.new_fingerprint,
        rotated_at: outcome.rotated_at,
    }))
}
