//! Shared instance resolution and authorization helpers used by every
//! handler in this module. Deliberately thin: the real authn/authz policy
//! lives behind `external::Authorizer` (spec component 4.I) — this just
//! wires the bearer token through and maps the result onto spec §6's status
//! codes (401 unauthenticated, 403 disallowed).

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::app::Services;
use crate::external::InstanceRecord;
use crate::tunnel::{TunnelService, TunnelSnapshot};

use super::error::ProxyError;

pub async fn resolve_instance(services: &Arc<Services>, id: &str) -> Result<InstanceRecord, ProxyError> {
    services.store.get_instance(id).await.map_err(ProxyError::from)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub async fn authorize(services: &Arc<Services>, instance_name: &str, headers: &HeaderMap) -> Result<(), ProxyError> {
    let token = bearer_token(headers);
    if token.is_none() {
        return Err(ProxyError::Unauthenticated);
    }
    if !services.authorizer.authorize(instance_name, token.as_deref()).await {
        return Err(ProxyError::Forbidden(format!("not authorized for instance {instance_name}")));
    }
    Ok(())
}

/// Looks up an open tunnel for `(instance_name, service)`; absent or closed
/// both map to `bad_gateway` per spec §4.F step 2.
pub async fn require_tunnel(
    services: &Arc<Services>,
    instance_name: &str,
    service: TunnelService,
) -> Result<TunnelSnapshot, ProxyError> {
    services
        .tunnels
        .tunnels(instance_name)
        .into_iter()
        .find(|t| t.service == service && !t.closed)
        .ok_or_else(|| ProxyError::BadGateway(format!("no {} tunnel for {instance_name}", service.as_str())))
}
