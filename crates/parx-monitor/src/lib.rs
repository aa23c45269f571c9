//! Resource monitoring capability: peak memory and CPU for a child process
//! and its descendants.

use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;
use tracing::debug;

/// Maximum observed resource usage over a monitored process tree.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PeakUsage {
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

/// Whether the monitoring capability exists on this platform.
pub fn monitoring_available() -> bool {
    sysinfo::IS_SUPPORTED_SYSTEM
}

/// Samples a process tree in a background task and tracks peak usage.
///
/// Sampling covers the root PID plus every process whose parent chain
/// reaches it, so forked workers are accounted for. The loop ends when the
/// root process disappears or `stop` is called.
pub struct ResourceMonitor {
    stop_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<PeakUsage>,
}

impl ResourceMonitor {
    /// Start monitoring `pid`, sampling once per `interval`.
    pub fn start(pid: u32, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut sys = System::new();
            let root = Pid::from_u32(pid);
            let mut peak = PeakUsage::default();

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }

                sys.refresh_processes(ProcessesToUpdate::All, true);
                if sys.process(root).is_none() {
                    break;
                }

                let (memory_mb, cpu_percent) = sample_tree(&sys, root);
                if memory_mb > peak.memory_mb {
                    peak.memory_mb = memory_mb;
                }
                if cpu_percent > peak.cpu_percent {
                    peak.cpu_percent = cpu_percent;
                }
            }

            debug!(
                pid,
                memory_mb = peak.memory_mb,
                cpu_percent = peak.cpu_percent,
                "resource monitor finished"
            );
            peak
        });

        Self { stop_tx, handle }
    }

    /// Stop sampling and return the peak usage seen so far.
    pub async fn stop(self) -> PeakUsage {
        let _ = self.stop_tx.send(true);
        self.handle.await.unwrap_or_default()
    }
}

/// Sum memory (MB) and CPU (%) over the root and its descendants.
fn sample_tree(sys: &System, root: Pid) -> (f64, f64) {
    let mut memory_bytes: u64 = 0;
    let mut cpu_percent: f64 = 0.0;

    for (pid, process) in sys.processes() {
        if is_in_tree(sys, *pid, root) {
            memory_bytes += process.memory();
            cpu_percent += f64::from(process.cpu_usage());
        }
    }

    (memory_bytes as f64 / 1024.0 / 1024.0, cpu_percent)
}

/// Walk parent links from `pid` up to `root`, bounded against cycles.
fn is_in_tree(sys: &System, mut pid: Pid, root: Pid) -> bool {
    for _ in 0..32 {
        if pid == root {
            return true;
        }
        match sys.process(pid).and_then(|p| p.parent()) {
            Some(parent) => pid = parent,
            None => return false,
        }
    }
    false
}
