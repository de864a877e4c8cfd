//! HTTP/WS Proxy (spec component 4.F): the only network-facing surface of
//! this crate. Every route resolves an instance, authorizes the caller,
//! then either reverse-proxies to a tunnel, splices a websocket, or calls
//! straight into one of the other components (files, logs, admin).

mod admin;
mod auth;
mod error;
mod files;
mod logs;
mod reverse;
mod router;
mod terminal_ws;

pub use error::ProxyError;
pub use router::build_router;
