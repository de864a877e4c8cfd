//! Assembles the HTTP surface from spec §6's route table. Grounded on
//! ZingerLittleBee's `management.rs` (axum `Router::new().route(...).layer(...)`
//! plus a `CorsLayer`/`with_state` shape) and `tower-http`'s `TraceLayer` for
//! request logging the way the teacher's own bridge server logs connections.

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::Services;

use super::{admin, files, logs, reverse, terminal_ws};

pub fn build_router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/instances/:id/desktop/*rest", any(reverse::desktop))
        .route("/instances/:id/control/*rest", any(reverse::control))
        .route("/instances/:id/chat", get(reverse::chat))
        .route("/instances/:id/terminal", get(terminal_ws::terminal))
        .route("/instances/:id/logs", get(logs::stream))
        .route("/instances/:id/files/browse", get(files::browse))
        .route("/instances/:id/files/read", get(files::read))
        .route("/instances/:id/files/write", post(files::write))
        .route("/instances/:id/files/mkdir", post(files::mkdir))
        .route("/instances/:id/ssh-status", get(admin::ssh_status))
        .route("/instances/:id/ssh-events", get(admin::ssh_events))
        .route("/instances/:id/ssh-test", post(admin::ssh_test))
        .route("/instances/:id/ssh-reconnect", post(admin::ssh_reconnect))
        .route("/instances/:id/ssh-fingerprint", get(admin::ssh_fingerprint))
        .route("/instances/:id/tunnels", get(admin::tunnels))
        .route("/instances/:id/rotate-ssh-key", post(admin::rotate_ssh_key))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}
