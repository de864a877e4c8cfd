//! Scheduled key rotation (spec §4.H, daily after a 1-minute startup
//! delay): for each instance with `keyRotationPolicyDays > 0`, rotates once
//! `daysSinceRotation` reaches the policy. Failures are logged and do not
//! abort the cycle — the next day's run is expected to converge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::app::Services;
use crate::external::AuditEventKind;
use crate::key::SshKeyInstaller;

const STARTUP_DELAY: Duration = Duration::from_secs(60);
const INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn run(services: Arc<Services>, mut cancel: broadcast::Receiver<()>) {
    tokio::select! {
        _ = cancel.recv() => return,
        _ = tokio::time::sleep(STARTUP_DELAY) => {}
    }

    let mut ticker = tokio::time::interval(INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick; we already waited STARTUP_DELAY

    loop {
        rotate_due_instances(&services).await;
        tokio::select! {
            _ = cancel.recv() => return,
            _ = ticker.tick() => {}
        }
    }
}

async fn rotate_due_instances(services: &Arc<Services>) {
    let instances = match services.store.list_instances().await {
        Ok(instances) => instances,
        Err(e) => {
            warn!(error = %e, "key rotation: failed to list instances");
            return;
        }
    };

    for instance in instances {
        if instance.key_rotation_policy_days == 0 {
            continue;
        }

        let since = instance.last_key_rotation.unwrap_or(instance.created_at);
        let days_since_rotation = Utc::now().signed_duration_since(since).num_days().max(0) as u32;
        if days_since_rotation < instance.key_rotation_policy_days {
            continue;
        }

        if let Err(e) = rotate_one(services, &instance.name).await {
            warn!(instance = %instance.name, error = %e, "key rotation: failed, will retry next cycle");
        }
    }
}

async fn rotate_one(services: &Arc<Services>, name: &str) -> Result<(), String> {
    let instance = services.store.get_instance(name).await.map_err(|e| e.to_string())?;

    let (old_public, old_path) = match (&instance.ssh_public_key, &instance.ssh_private_key_path) {
        (Some(public), Some(path)) => (public.clone(), path.clone()),
        _ => return Err("instance has no key material on file".to_string()),
    };

    let endpoint = services.orchestrator.ssh_endpoint(name).await.map_err(|e| e.to_string())?;

    let installer = SshKeyInstaller::new(services.pool.clone(), services.config.ops_exec_timeout());
    let outcome = services
        .key_store
        .rotate(name, &old_public, &old_path, name, &installer)
        .await
        .map_err(|e| e.to_string())?;

    services
        .store
        .record_key_rotation(name, &outcome.new_public_key_openssh, &outcome.new_path, &outcome.new_fingerprint, outcome.rotated_at)
        .await
        .map_err(|e| e.to_string())?;

    services
        .audit
        .log(
            crate::audit::AuditEntry::new(instance.id.clone(), name.to_string(), AuditEventKind::KeyRotation)
                .with_details(format!("fingerprint={}", outcome.new_fingerprint)),
        )
        .await
        .ok();

    services.pool.close(name).await;

    let signer = services.key_store.load(&outcome.new_path).await.map_err(|e| e.to_string())?;
    // `allowedSourceIPs` governs external request origins, not this internal
    // control-plane reconnect — passing the instance's allowlist here would
    // fail-closed against the literal string "maintenance" and strand the
    // instance disconnected right after a successful rotation.
    services
        .pool
        .ensure(name, &endpoint.host, endpoint.port, "agent", Arc::new(signer), "maintenance", None)
        .await
        .map_err(|e| e.to_string())?;

    services.tunnels.start(name).await.map_err(|e| e.to_string())?;

    info!(instance = name, fingerprint = %outcome.new_fingerprint, "key rotation: completed");
    Ok(())
}
