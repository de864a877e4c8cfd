//! Tunnel maintenance (spec §4.H, every 60 s): reconciles desired tunnel
//! state against each instance's orchestrator status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::app::Services;
use crate::external::InstanceStatus;

const INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(services: Arc<Services>, mut cancel: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.recv() => return,
            _ = ticker.tick() => reconcile_once(&services).await,
        }
    }
}

async fn reconcile_once(services: &Arc<Services>) {
    let instances = match services.store.list_instances().await {
        Ok(instances) => instances,
        Err(e) => {
            warn!(error = %e, "tunnel maintenance: failed to list instances");
            return;
        }
    };

    for instance in instances {
        let status = match services.orchestrator.status(&instance.name).await {
            Ok(status) => status,
            Err(e) => {
                warn!(instance = %instance.name, error = %e, "tunnel maintenance: failed to read orchestrator status");
                continue;
            }
        };

        if status == InstanceStatus::Running {
            if !services.pool.is_connected(&instance.name) {
                continue;
            }
            if let Err(e) = services.tunnels.start(&instance.name).await {
                warn!(instance = %instance.name, error = %e, "tunnel maintenance: failed to (re)start tunnels");
            } else {
                debug!(instance = %instance.name, "tunnel maintenance: tunnels confirmed running");
            }
        } else {
            services.tunnels.stop(&instance.name);
        }
    }
}
