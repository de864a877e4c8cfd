//! HTTP and WebSocket reverse proxying to the VNC/gateway tunnels (spec
//! §4.F, rows 1-3 of the route table). Grounded on ZingerLittleBee's
//! `proxy.rs` for the "reverse proxy to a forwarded port" shape, adapted to
//! target the tunnel's already-open *local* TCP port via `reqwest` rather
//! than opening a fresh SSH channel per request — the Tunnel Manager is the
//! sole owner of that splice (spec §3's "at most one Tunnel per service").

use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as TungsteniteCloseFrame, Message as TungsteniteMessage};
use tracing::warn;

use crate::app::Services;
use crate::tunnel::TunnelService;

use super::auth::{authorize, require_tunnel, resolve_instance};
use super::error::ProxyError;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub async fn desktop(
    state: State<Arc<Services>>,
    path: Path<(String, String)>,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    proxy(state.0, path.0, TunnelService::Vnc, req).await
}

pub async fn control(
    state: State<Arc<Services>>,
    path: Path<(String, String)>,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    proxy(state.0, path.0, TunnelService::Gateway, req).await
}

/// WS `/instances/{id}/chat`: a fixed-path splice to the gateway tunnel,
/// distinct from `control`'s wildcard reverse proxy because it never needs
/// to pass through an arbitrary sub-path.
pub async fn chat(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;
    let tunnel = require_tunnel(&services, &instance.name, TunnelService::Gateway).await?;

    let url = format!("ws://127.0.0.1:{}/chat", tunnel.local_port);
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = splice_websocket(socket, url).await {
            warn!(error = %e, "chat websocket splice ended with error");
        }
    }))
}

async fn proxy(
    services: Arc<Services>,
    (id, rest): (String, String),
    service: TunnelService,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, req.headers()).await?;
    let tunnel = require_tunnel(&services, &instance.name, service).await?;

    let is_websocket_upgrade = req
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let query = req.uri().query().map(|q| format!("?{q}")).unwrap_or_default();
    let path = if rest.starts_with('/') { rest } else { format!("/{rest}") };

    if is_websocket_upgrade {
        let (mut parts, _body) = req.into_parts();
        let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &services)
            .await
            .map_err(|e| ProxyError::BadRequest(format!("websocket upgrade rejected: {e:?}")))?;

        let url = format!("ws://127.0.0.1:{}{path}{query}", tunnel.local_port);
        return Ok(upgrade.on_upgrade(move |socket| async move {
            if let Err(e) = splice_websocket(socket, url).await {
                warn!(error = %e, "websocket splice ended with error");
            }
        }));
    }

    reverse_http(&services, tunnel.local_port, &path, &query, req).await
}

async fn reverse_http(
    services: &Arc<Services>,
    local_port: u16,
    path: &str,
    query: &str,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();
    let upstream_url = format!("http://127.0.0.1:{local_port}{path}{query}");

    let mut builder = services.http_client.request(parts.method.clone(), &upstream_url);
    for (name, value) in parts.headers.iter() {
        if HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let upstream_resp = builder
        .send()
        .await
        .map_err(|e| ProxyError::BadGateway(e.to_string()))?;

    let mut response_builder = Response::builder().status(upstream_resp.status().as_u16());
    for (name, value) in upstream_resp.headers().iter() {
        if HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        response_builder = response_builder.header(name.clone(), value.clone());
    }

    response_builder
        .body(Body::from_stream(upstream_resp.bytes_stream()))
        .map_err(|e| ProxyError::Internal(e.to_string()))
}

/// Dials `upstream_url` and forwards frames bidirectionally until either
/// side closes. Used by both the wildcard reverse-proxy upgrade path and
/// the fixed `/chat` route.
async fn splice_websocket(socket: WebSocket, upstream_url: String) -> Result<(), String> {
    let (upstream, _response) = tokio_tungstenite::connect_async(&upstream_url)
        .await
        .map_err(|e| format!("dial {upstream_url}: {e}"))?;

    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let done = matches!(msg, AxumMessage::Close(_));
            if upstream_tx.send(to_tungstenite(msg)).await.is_err() || done {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(converted) = from_tungstenite(msg) else { continue };
            let done = matches!(converted, AxumMessage::Close(_));
            if client_tx.send(converted).await.is_err() || done {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }

    Ok(())
}

fn to_tungstenite(msg: AxumMessage) -> TungsteniteMessage {
    match msg {
        AxumMessage::Text(t) => TungsteniteMessage::Text(t),
        AxumMessage::Binary(b) => TungsteniteMessage::Binary(b),
        AxumMessage::Ping(b) => TungsteniteMessage::Ping(b),
        AxumMessage::Pong(b) => TungsteniteMessage::Pong(b),
        AxumMessage::Close(frame) => TungsteniteMessage::Close(frame.map(|f| TungsteniteCloseFrame {
            code: f.code.into(),
            reason: f.reason,
        })),
    }
}

fn from_tungstenite(msg: TungsteniteMessage) -> Option<AxumMessage> {
    Some(match msg {
        TungsteniteMessage::Text(t) => AxumMessage::Text(t),
        TungsteniteMessage::Binary(b) => AxumMessage::Binary(b),
        TungsteniteMessage::Ping(b) => AxumMessage::Ping(b),
        TungsteniteMessage::Pong(b) => AxumMessage::Pong(b),
        TungsteniteMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason,
        })),
        TungsteniteMessage::Frame(_) => return None,
    })
}
