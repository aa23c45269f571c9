//! Bounded-concurrency scheduler: drives the worker pool over the task-spec
//! sequence, applies launch throttling and the failure policy, and handles
//! cooperative shutdown on signals.

pub mod policy;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parx_core::paths::SessionPaths;
use parx_core::{ResolvedConfig, ShutdownReason, TaskStatus};
use parx_expand::TaskSpec;
use parx_process::{CancelRequest, RunRequest, TaskResult, run_task};

use policy::{FailurePolicy, PolicyDecision};

/// Aggregate accounting for one session.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub launch_errors: usize,
    pub shutdown_reason: Option<ShutdownReason>,
}

impl RunReport {
    fn count(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Timeout => self.timed_out += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::LaunchError => self.launch_errors += 1,
        }
    }

    /// Results delivered so far, across all statuses.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.cancelled + self.launch_errors
    }
}

/// Run the whole spec sequence under the bounded worker pool.
///
/// Contract:
/// - at most `max_workers` children run at any time;
/// - dispatch order equals spec order, with `start_delay_seconds` between
///   launches;
/// - completions wake the scheduler promptly, and its idle wait is bounded
///   by `poll_wait_seconds`;
/// - SIGTERM/SIGINT stop new dispatches and request graceful cancellation
///   of running tasks, a second signal escalates to SIGKILL, SIGHUP is
///   ignored so detached operation survives terminal loss;
/// - every spec produces exactly one result through `on_result`
///   (undispatched specs as synthesized CANCELLED records).
pub async fn run_session(
    specs: Vec<TaskSpec>,
    config: &ResolvedConfig,
    paths: &SessionPaths,
    monitor_enabled: bool,
    mut on_result: impl FnMut(&TaskResult),
) -> Result<RunReport> {
    let mut report = RunReport {
        total: specs.len(),
        ..Default::default()
    };

    std::fs::create_dir_all(paths.workspace_dir()).with_context(|| {
        format!(
            "Failed to create workspace: {}",
            paths.workspace_dir().display()
        )
    })?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let (cancel_tx, _cancel_rx) = watch::channel(CancelRequest::None);
    let mut policy = FailurePolicy::from_config(config);
    let mut join_set: JoinSet<TaskResult> = JoinSet::new();

    let start_delay = Duration::from_secs_f64(config.start_delay_seconds);
    let poll_wait = Duration::from_secs_f64(config.poll_wait_seconds);

    let mut pending = specs.into_iter();
    let mut next_spec = pending.next();
    let mut free_workers: Vec<u32> = (1..=config.max_workers).rev().collect();
    let mut last_dispatch: Option<Instant> = None;
    let mut shutdown_reason: Option<ShutdownReason> = None;
    let mut signal_seen = false;

    loop {
        // Dispatch as long as a spec is waiting, a worker slot is free, no
        // shutdown was requested, and the inter-launch delay has elapsed.
        let can_dispatch =
            shutdown_reason.is_none() && next_spec.is_some() && !free_workers.is_empty();
        let delay_remaining = if can_dispatch {
            last_dispatch.and_then(|at| start_delay.checked_sub(at.elapsed()))
        } else {
            None
        };

        if can_dispatch && delay_remaining.is_none() {
            let spec = next_spec.take().expect("checked above");
            next_spec = pending.next();
            let worker_id = free_workers.pop().expect("checked above");
            last_dispatch = Some(Instant::now());

            dispatch(
                &mut join_set,
                spec,
                config,
                paths,
                worker_id,
                monitor_enabled,
                cancel_tx.subscribe(),
            );
            continue;
        }

        if join_set.is_empty() && (next_spec.is_none() || shutdown_reason.is_some()) {
            break;
        }

        // Bounded wait: wake on a completion, a signal, or the poll tick
        // (which also re-arms a pending inter-launch delay).
        let wait = match delay_remaining {
            Some(remaining) => remaining.min(poll_wait),
            None => poll_wait,
        };

        tokio::select! {
            joined = join_set.join_next(), if !join_set.is_empty() => {
                match joined {
                    Some(Ok(result)) => {
                        free_workers.push(result.worker_id);
                        handle_completion(
                            &result,
                            &mut report,
                            &mut policy,
                            &mut shutdown_reason,
                            &cancel_tx,
                            &mut on_result,
                        );
                    }
                    Some(Err(e)) => warn!(error = %e, "worker task panicked"),
                    None => {}
                }
            }
            _ = sigterm.recv() => {
                handle_signal("SIGTERM", &mut shutdown_reason, &mut signal_seen, &cancel_tx);
            }
            _ = sigint.recv() => {
                handle_signal("SIGINT", &mut shutdown_reason, &mut signal_seen, &cancel_tx);
            }
            _ = sighup.recv() => {
                debug!("SIGHUP ignored");
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }

    // Whatever never reached a worker becomes a CANCELLED record.
    for spec in next_spec.into_iter().chain(pending) {
        let result = TaskResult::cancelled_before_dispatch(spec);
        report.count(result.status);
        on_result(&result);
    }

    report.shutdown_reason = shutdown_reason;
    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        timed_out = report.timed_out,
        cancelled = report.cancelled,
        launch_errors = report.launch_errors,
        "session finished"
    );
    Ok(report)
}

fn dispatch(
    join_set: &mut JoinSet<TaskResult>,
    spec: TaskSpec,
    config: &ResolvedConfig,
    paths: &SessionPaths,
    worker_id: u32,
    monitor_enabled: bool,
    cancel_rx: watch::Receiver<CancelRequest>,
) {
    let working_directory = effective_working_directory(&spec, config, paths, worker_id);
    info!(
        index = spec.index,
        total = spec.total,
        worker_id,
        command = %spec.command_display(),
        "dispatching task"
    );

    let config = config.clone();
    join_set.spawn(async move {
        let request = RunRequest {
            spec: &spec,
            config: &config,
            worker_id,
            working_directory: &working_directory,
            monitor_enabled,
        };
        run_task(request, cancel_rx).await
    });
}

/// Shared workspace by default; a per-worker subdirectory when isolation
/// is on. A directory that cannot be created surfaces as a LAUNCH_ERROR
/// when the spawn fails on the invalid cwd.
fn effective_working_directory(
    spec: &TaskSpec,
    config: &ResolvedConfig,
    paths: &SessionPaths,
    worker_id: u32,
) -> PathBuf {
    if !config.workspace_isolation {
        return spec.working_directory.clone();
    }
    let dir = paths.worker_dir(worker_id);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(path = %dir.display(), error = %e, "failed to create worker directory");
    }
    dir
}

fn handle_completion(
    result: &TaskResult,
    report: &mut RunReport,
    policy: &mut FailurePolicy,
    shutdown_reason: &mut Option<ShutdownReason>,
    cancel_tx: &watch::Sender<CancelRequest>,
    on_result: &mut impl FnMut(&TaskResult),
) {
    debug!(
        index = result.spec.index,
        status = %result.status,
        duration_secs = result.duration_seconds,
        "task completed"
    );
    report.count(result.status);

    if policy.record(result.status) == PolicyDecision::Stop && shutdown_reason.is_none() {
        warn!(
            failures = policy.failures(),
            "failure limit reached; cancelling remaining tasks"
        );
        *shutdown_reason = Some(ShutdownReason::StopLimit);
        let _ = cancel_tx.send(CancelRequest::Graceful);
    }

    on_result(result);
}

fn handle_signal(
    name: &str,
    shutdown_reason: &mut Option<ShutdownReason>,
    signal_seen: &mut bool,
    cancel_tx: &watch::Sender<CancelRequest>,
) {
    if *signal_seen {
        warn!(signal = name, "second signal; escalating to SIGKILL");
        let _ = cancel_tx.send(CancelRequest::Kill);
        return;
    }

    *signal_seen = true;
    info!(signal = name, "shutdown requested; cancelling running tasks");
    if shutdown_reason.is_none() {
        *shutdown_reason = Some(ShutdownReason::Signal);
    }
    let _ = cancel_tx.send(CancelRequest::Graceful);
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
