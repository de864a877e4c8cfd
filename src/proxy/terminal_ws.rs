//! WS `/instances/{id}/terminal?session_id=`: opens a new PTY session or
//! reattaches to an existing one (spec §4.F row 4). Wire format is a small
//! convention layered over the raw websocket: binary frames carry PTY bytes
//! in both directions; a text frame of the form `resize:<cols>:<rows>` asks
//! the remote PTY to resize. Reattaching replaces whatever client was
//! previously attached — see `TerminalManager::attach`'s single-attacher
//! contract.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::app::Services;
use crate::terminal::TerminalSession;

use super::auth::{authorize, resolve_instance};
use super::error::ProxyError;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub session_id: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "bash".to_string()
}

pub async fn terminal(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    Query(query): Query<TerminalQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let session = match query.session_id.as_deref() {
        Some(session_id) => services
            .terminals
            .get(session_id)
            .ok_or_else(|| ProxyError::InstanceNotFound(format!("terminal session {session_id}")))?,
        None => {
            services
                .terminals
                .create(&instance.name, "proxy-client", &query.shell)
                .await?
        }
    };

    Ok(ws.on_upgrade(move |socket| pump(services, session, socket)))
}

async fn pump(services: Arc<Services>, session: Arc<TerminalSession>, socket: WebSocket) {
    let id = session.id.clone();
    let (client_tx, mut client_rx) = mpsc::channel::<Vec<u8>>(64);

    if let Err(e) = services.terminals.attach(&id, client_tx).await {
        warn!(session = %id, error = %e, "failed to attach terminal session to websocket");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let outbound = async {
        while let Some(data) = client_rx.recv().await {
            if ws_tx.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    };

    let inbound = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Binary(data) => {
                    let _ = services.terminals.write_stdin(&id, data).await;
                }
                Message::Text(text) => {
                    if let Some((cols, rows)) = parse_resize(&text) {
                        let _ = services.terminals.resize(&id, cols, rows).await;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }

    services.terminals.detach(&id);
}

fn parse_resize(text: &str) -> Option<(u16, u16)> {
    let rest = text.strip_prefix("resize:")?;
    let (cols, rows) = rest.split_once(':')?;
    Some((cols.parse().ok()?, rows.parse().ok()?))
}
