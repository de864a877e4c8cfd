//! Audit retention (spec §4.H, daily after a 5-minute startup delay): prunes
//! audit entries older than the configured retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::app::Services;

const STARTUP_DELAY: Duration = Duration::from_secs(5 * 60);
const INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn run(services: Arc<Services>, mut cancel: broadcast::Receiver<()>) {
    tokio::select! {
        _ = cancel.recv() => return,
        _ = tokio::time::sleep(STARTUP_DELAY) => {}
    }

    let mut ticker = tokio::time::interval(INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        purge_once(&services).await;
        tokio::select! {
            _ = cancel.recv() => return,
            _ = ticker.tick() => {}
        }
    }
}

async fn purge_once(services: &Arc<Services>) {
    match services.audit.purge_older_than(services.config.audit_retention_days).await {
        Ok(purged) => info!(purged, "audit retention: purge complete"),
        Err(e) => warn!(error = %e, "audit retention: purge failed"),
    }
}
