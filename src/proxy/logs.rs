//! `GET /instances/{id}/logs?tail=N&follow=bool` (spec §4.F): an SSE line
//! stream over `LogClient::stream_logs`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream};
use serde::Deserialize;

use crate::app::Services;

use super::auth::{authorize, resolve_instance};
use super::error::ProxyError;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: u32,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_tail() -> u32 {
    100
}

pub async fn stream(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let path = match query.path {
        Some(p) => p,
        None => instance
            .log_paths
            .get("default")
            .cloned()
            .ok_or_else(|| ProxyError::BadRequest("instance has no default log path configured".to_string()))?,
    };

    let rx = services.logs.stream_logs(&instance.name, &path, query.tail, query.follow).await?;

    let events = stream::unfold(rx, |mut rx| async move {
        let line = rx.recv().await?;
        let event = match line {
            Ok(text) => Event::default().event("log").data(text),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Some((Ok::<Event, Infallible>(event), rx))
    });

    Ok(sse_response(events))
}

fn sse_response(events: impl Stream<Item = Result<Event, Infallible>> + Send + 'static) -> Response {
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
