use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::manager::{TunnelManager, WELL_KNOWN_SERVICES};

fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_stays_within_twenty_percent() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d.as_millis() >= 800 && d.as_millis() <= 1200, "{:?} out of bounds", d);
        }
    }
}

/// Per-instance monitor: every `tunnel_monitor_interval`, drops closed
/// tunnels and recreates any missing well-known service with exponential
/// backoff. Runs until `cancel_rx` fires (sent by `TunnelManager::stop` or
/// `shutdown`).
pub(super) async fn run_instance_monitor(manager: Arc<TunnelManager>, instance_name: String, mut cancel_rx: broadcast::Receiver<()>) {
    let policy = manager.config.tunnel_reconnect_policy();
    let interval = manager.config.tunnel_monitor_interval();

    let mut next_retry_at: [Option<Instant>; WELL_KNOWN_SERVICES.len()] = [None, None];
    let mut attempts: [u32; WELL_KNOWN_SERVICES.len()] = [0, 0];

    loop {
        tokio::select! {
            _ = cancel_rx.recv() => {
                debug!(instance = %instance_name, "tunnel monitor stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        manager.drop_closed_tunnels(&instance_name);

        let Some(controller) = manager.pool.get(&instance_name) else {
            // No live session; nothing to recreate against until the
            // Connection Pool reconnects on its own schedule.
            continue;
        };

        for (idx, service) in WELL_KNOWN_SERVICES.iter().enumerate() {
            if manager.has_open_tunnel(&instance_name, *service) {
                attempts[idx] = 0;
                next_retry_at[idx] = None;
                continue;
            }

            if let Some(at) = next_retry_at[idx] {
                if Instant::now() < at {
                    continue;
                }
            }

            match manager.open_tunnel(&instance_name, *service, controller.clone()).await {
                Ok(_) => {
                    if attempts[idx] > 0 {
                        manager.note_reconnection(&instance_name);
                        info!(instance = %instance_name, service = service.as_str(), "tunnel recreated");
                    }
                    attempts[idx] = 0;
                    next_retry_at[idx] = None;
                }
                Err(e) => {
                    attempts[idx] += 1;
                    let delay = jittered(policy.delay_for_attempt(attempts[idx]));
                    next_retry_at[idx] = Some(Instant::now() + delay);
                    warn!(
                        instance = %instance_name,
                        service = service.as_str(),
                        attempt = attempts[idx],
                        error = %e,
                        "failed to recreate tunnel, will retry"
                    );
                }
            }
        }
    }
}

/// Global probe loop (one per `TunnelManager`): every
/// `tunnel_global_probe_interval`, TCP-dials each open tunnel's local port
/// with a short timeout. A failed probe closes the tunnel so the owning
/// instance's monitor recreates it on its next tick.
pub(super) async fn run_global_probe_loop(manager: Arc<TunnelManager>, mut cancel_rx: broadcast::Receiver<()>) {
    let interval = manager.config.tunnel_global_probe_interval();
    let timeout = manager.config.tunnel_probe_timeout();

    loop {
        tokio::select! {
            _ = cancel_rx.recv() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        for tunnel in manager.all_open_tunnels() {
            if tunnel.is_closed() {
                continue;
            }
            let addr = format!("127.0.0.1:{}", tunnel.local_port);
            match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => tunnel.record_check(None),
                Ok(Err(e)) => {
                    tunnel.record_check(Some(e.to_string()));
                    tunnel.mark_closed();
                }
                Err(_) => {
                    tunnel.record_check(Some("probe timed out".to_string()));
                    tunnel.mark_closed();
                }
            }
        }
    }
}
