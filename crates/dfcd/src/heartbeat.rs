//! Heartbeat monitor: detects silently-dead devices.
//!
//! Transport closes demote a device immediately through the registry's
//! close notification. This task covers the other failure mode: half-open
//! connections where the transport never notices. It is the only
//! component allowed to demote a device purely on the passage of time.
//!
//! Each scan snapshots the device list first (one registry round-trip),
//! then demotes the expired devices one by one; the actor makes each
//! demotion idempotent, so a device that went Offline between snapshot
//! and demotion costs nothing and fires no duplicate event.

use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dfc_core::{DeviceStatus, DisconnectReason};

use crate::registry::RegistryHandle;

/// Spawns the heartbeat monitor task.
///
/// * `timeout` - silence threshold after which an Online device is demoted
/// * `scan_interval` - how often the device list is scanned
pub fn spawn_heartbeat_monitor(
    registry: RegistryHandle,
    timeout: Duration,
    scan_interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(scan_interval);

        info!(
            timeout_secs = timeout.as_secs(),
            scan_secs = scan_interval.as_secs(),
            "heartbeat monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("heartbeat monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    sweep(&registry, timeout).await;
                }
            }
        }
    })
}

/// One scan: snapshot, select expired, demote.
async fn sweep(registry: &RegistryHandle, timeout: Duration) {
    let devices = registry.list_all().await;

    let expired: Vec<_> = devices
        .into_iter()
        .filter(|view| view.status == DeviceStatus::Online)
        .filter(|view| match view.heartbeat_age_secs {
            Some(age) => age > timeout.as_secs(),
            // Online devices always have a liveness baseline from
            // registration; a missing one is treated as expired.
            None => true,
        })
        .collect();

    if expired.is_empty() {
        debug!("heartbeat sweep: all devices current");
        return;
    }

    for view in expired {
        warn!(
            device_id = %view.id,
            age_secs = ?view.heartbeat_age_secs,
            timeout_secs = timeout.as_secs(),
            "device missed heartbeat threshold"
        );

        if let Err(e) = registry
            .mark_offline(view.id.clone(), DisconnectReason::HeartbeatTimeout)
            .await
        {
            debug!(device_id = %view.id, error = %e, "heartbeat demotion skipped");
        }
    }
}
