//! `GET /instances/{id}/files/browse|read`, `POST /instances/{id}/files/write|mkdir`
//! (spec §4.F). The spec's literal route table collapses write/mkdir onto
//! one wildcard `POST /instances/{id}/files/*`; this splits them into two
//! named sub-routes instead so the handler doesn't have to string-match a
//! captured wildcard tail to tell "write" from "mkdir" apart — see
//! DESIGN.md's Open Question log.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::Services;
use crate::ops::EntryKind;

use super::auth::{authorize, resolve_instance};
use super::error::ProxyError;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Serialize)]
struct FileEntryJson {
    name: String,
    kind: &'static str,
    size: Option<u64>,
    permissions: String,
}

pub async fn browse(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileEntryJson>>, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let entries = services.files.list_directory(&instance.name, &query.path).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| FileEntryJson {
                name: e.name,
                kind: match e.kind {
                    EntryKind::File => "file",
                    EntryKind::Dir => "dir",
                    EntryKind::Link => "link",
                },
                size: e.size,
                permissions: e.permissions,
            })
            .collect(),
    ))
}

pub async fn read(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    let bytes = services.files.read_file(&instance.name, &query.path).await?;
    Ok(([(axum::http::header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

pub async fn write(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    services.files.write_file(&instance.name, &query.path, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mkdir(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, ProxyError> {
    let instance = resolve_instance(&services, &id).await?;
    authorize(&services, &instance.name, &headers).await?;

    services.files.create_directory(&instance.name, &query.path).await?;
    Ok(StatusCode::NO_CONTENT)
}
