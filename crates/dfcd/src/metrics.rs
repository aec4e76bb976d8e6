//! Daemon self-monitoring.
//!
//! Samples the daemon's own CPU and memory usage on a fixed period and
//! logs it, warning when thresholds are exceeded. A coordinator that
//! quietly balloons takes the whole fleet's presence layer with it, so
//! the numbers go into the normal log stream where operators already look.

use std::process;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Memory usage warning threshold in MB.
pub const HIGH_MEMORY_THRESHOLD_MB: u64 = 100;

/// CPU usage warning threshold (percentage).
pub const HIGH_CPU_THRESHOLD_PERCENT: f32 = 80.0;

/// How often to sample.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// One resource usage sample.
#[derive(Debug, Clone, Default)]
pub struct ResourceSample {
    pub memory_mb: u64,
    pub cpu_percent: f32,
    pub memory_high: bool,
    pub cpu_high: bool,
}

/// Samples resource usage of the daemon process via `sysinfo`.
///
/// CPU percentages need a baseline: the first sample after construction
/// reads as 0.0 and each later sample is relative to the previous one.
pub struct ResourceMonitor {
    system: System,
    pid: Pid,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
        }
    }

    /// Refreshes process information and returns the current sample.
    pub fn sample(&mut self) -> ResourceSample {
        // refresh_all is required for the CPU calculation; refreshing a
        // single process does not compute usage.
        self.system.refresh_all();

        let (memory_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        let memory_mb = memory_bytes / 1024 / 1024;

        ResourceSample {
            memory_mb,
            cpu_percent,
            memory_high: memory_mb > HIGH_MEMORY_THRESHOLD_MB,
            cpu_high: cpu_percent > HIGH_CPU_THRESHOLD_PERCENT,
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the sampling task. Cooperative shutdown via CancellationToken.
pub fn spawn_metrics_task(cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = ResourceMonitor::new();
        let mut tick = interval(SAMPLE_INTERVAL);

        // Baseline for the CPU calculation.
        let _ = monitor.sample();

        info!(
            interval_secs = SAMPLE_INTERVAL.as_secs(),
            "resource monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("resource monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let sample = monitor.sample();
                    log_sample(&sample);
                }
            }
        }

        debug!("resource monitor task completed");
    })
}

fn log_sample(sample: &ResourceSample) {
    if sample.memory_high || sample.cpu_high {
        warn!(
            memory_mb = sample.memory_mb,
            cpu_percent = format!("{:.1}", sample.cpu_percent),
            "daemon resource usage above threshold"
        );
    } else {
        info!(
            memory_mb = sample.memory_mb,
            cpu_percent = format!("{:.1}", sample.cpu_percent),
            "daemon resource usage"
        );
    }
}
