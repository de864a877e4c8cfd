use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ssh::HandleController;

use super::splice::splice_connection;
use super::types::Tunnel;

/// Accepts local connections and splices each one to the instance's agent
/// port. The accept call itself is bounded to a short deadline so the loop
/// checks for cancellation promptly rather than blocking indefinitely in
/// `accept()`.
pub async fn run_accept_loop(
    listener: TcpListener,
    controller: HandleController,
    tunnel: Arc<Tunnel>,
    mut cancel_rx: broadcast::Receiver<()>,
) {
    loop {
        if tunnel.is_closed() {
            return;
        }

        tokio::select! {
            _ = cancel_rx.recv() => {
                return;
            }
            accepted = tokio::time::timeout(std::time::Duration::from_secs(1), listener.accept()) => {
                match accepted {
                    Ok(Ok((stream, peer_addr))) => {
                        debug!(
                            instance = %tunnel.instance_name,
                            service = tunnel.service.as_str(),
                            %peer_addr,
                            "accepted tunnel connection"
                        );
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(error = %e, "failed to set TCP_NODELAY on tunnel connection");
                        }

                        let controller = controller.clone();
                        let tunnel = tunnel.clone();
                        let disconnect_rx = controller.subscribe_disconnect();

                        tokio::spawn(async move {
                            if let Err(e) = splice_connection(controller, stream, tunnel.clone(), disconnect_rx).await {
                                warn!(
                                    instance = %tunnel.instance_name,
                                    service = tunnel.service.as_str(),
                                    error = %e,
                                    "tunnel connection failed to open channel; listener keeps accepting"
                                );
                            }
                        });
                    }
                    Ok(Err(e)) => {
                        warn!(instance = %tunnel.instance_name, error = %e, "accept error on tunnel listener");
                    }
                    Err(_) => {
                        // 1s accept deadline elapsed; loop back around to re-check cancellation.
                    }
                }
            }
        }
    }
}
