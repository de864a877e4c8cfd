//! Binary entrypoint: wires up `Config`, the external-contract fixtures
//! (production deployments swap these for their own `Store`/`Orchestrator`/
//! `Authorizer`), the HTTP/WS proxy, and the three maintenance loops, then
//! runs until `SIGINT`/`SIGTERM`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fleetssh::app::Services;
use fleetssh::external::{AllowAll, InMemoryStore, StaticOrchestrator};
use fleetssh::proxy::build_router;
use fleetssh::{maintenance, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config();

    let store = Arc::new(InMemoryStore::new());
    let agent_host = std::env::var("FLEETSSH_AGENT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let orchestrator = Arc::new(StaticOrchestrator::new(store.clone(), agent_host));
    let authorizer = Arc::new(AllowAll);

    let services = Services::new(config, store, orchestrator, authorizer);

    let maintenance = maintenance::spawn(services.clone());

    let bind_addr: SocketAddr = std::env::var("FLEETSSH_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8089".to_string())
        .parse()
        .expect("FLEETSSH_BIND_ADDR must be a valid socket address");

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));
    tracing::info!(%bind_addr, "fleetssh proxy listening");

    let router = build_router(services.clone());
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("HTTP server exited unexpectedly");

    maintenance.shutdown().await;
    services.shutdown(Duration::from_secs(10)).await;
    tracing::info!("fleetssh shut down cleanly");
}

/// Reads `FLEETSSH_CONFIG` as a path to a JSON document and merges it over
/// the defaults; absent or unset, runs with every default from spec §6.
fn load_config() -> Config {
    let Ok(path) = std::env::var("FLEETSSH_CONFIG") else {
        return Config::default();
    };

    let contents = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"));
    serde_json::from_str(&contents).unwrap_or_else(|e| panic!("failed to parse {path}: {e}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
