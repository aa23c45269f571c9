//! Child process execution: spawn, stream capture, deadline enforcement,
//! and escalating termination.

pub mod ring;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use parx_core::{ResolvedConfig, TaskStatus};
use parx_expand::TaskSpec;
use parx_monitor::ResourceMonitor;

use ring::OutputRing;

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);
/// How long to wait for the child to disappear after SIGKILL before
/// reporting an orphaned process group.
const KILL_WAIT: Duration = Duration::from_secs(2);
/// How long to keep draining pipes after the child has exited. Covers a
/// grandchild that inherited the write end and never closes it.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

const READ_BUF_SIZE: usize = 4096;

/// Cancellation request broadcast by the scheduler to all running tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CancelRequest {
    #[default]
    None,
    /// Termination phase A: SIGTERM, then grace.
    Graceful,
    /// Termination phase B: SIGKILL immediately.
    Kill,
}

/// Captured output of one stream.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct StreamCapture {
    /// The last `max_output_capture` characters.
    pub tail: String,
    /// Characters the child wrote in total.
    pub total_chars: u64,
    pub truncated: bool,
}

impl StreamCapture {
    fn from_ring(mut ring: OutputRing) -> Self {
        ring.finish();
        Self {
            tail: ring.contents(),
            total_chars: ring.total_chars(),
            truncated: ring.truncated(),
        }
    }
}

/// Outcome record of executing one task spec.
///
/// The runner never fails: every error is folded into the status and
/// `error_message` fields.
#[derive(Clone, Debug)]
pub struct TaskResult {
    pub worker_id: u32,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
    pub peak_memory_mb: Option<f64>,
    pub peak_cpu_percent: Option<f64>,
    /// Absent on SUCCESS.
    pub error_message: Option<String>,
    /// The originating spec (index, argv, env bindings, arguments, file).
    pub spec: TaskSpec,
}

impl TaskResult {
    /// Synthesize a CANCELLED result for a spec that was never dispatched.
    pub fn cancelled_before_dispatch(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            worker_id: 0,
            status: TaskStatus::Cancelled,
            exit_code: None,
            started_at: now,
            ended_at: now,
            duration_seconds: 0.0,
            stdout: StreamCapture::default(),
            stderr: StreamCapture::default(),
            peak_memory_mb: None,
            peak_cpu_percent: None,
            error_message: Some("Cancelled before dispatch".to_string()),
            spec,
        }
    }
}

/// Everything the runner needs for one execution.
#[derive(Debug)]
pub struct RunRequest<'a> {
    pub spec: &'a TaskSpec,
    pub config: &'a ResolvedConfig,
    pub worker_id: u32,
    /// Effective working directory (per-worker when isolation is on).
    pub working_directory: &'a Path,
    /// Whether the resource-monitor capability is present.
    pub monitor_enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Running,
    TermSent,
    Killed,
}

/// Execute one task spec to completion.
///
/// Streams stdout/stderr into output rings without ever blocking on the
/// child, enforces the wall-clock timeout with the SIGTERM-grace-SIGKILL
/// sequence against the whole process group, and reacts to scheduler
/// cancellation. All failures become part of the returned result.
pub async fn run_task(
    request: RunRequest<'_>,
    mut cancel: watch::Receiver<CancelRequest>,
) -> TaskResult {
    let spec = request.spec;
    let config = request.config;
    let started_at = Utc::now();
    let start = Instant::now();

    let mut command = build_command(spec, config, request.working_directory);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return launch_error_result(request, started_at, start, e.to_string());
        }
    };

    let pid = child.id();
    let monitor = match (request.monitor_enabled, pid) {
        (true, Some(pid)) => Some(ResourceMonitor::start(
            pid,
            Duration::from_secs_f64(config.poll_wait_seconds),
        )),
        _ => None,
    };

    let mut stdout_ring = OutputRing::new(config.max_output_capture);
    let mut stderr_ring = OutputRing::new(config.max_output_capture);

    // The pipes are always present: build_command pipes both streams.
    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut stderr = child.stderr.take().expect("stderr piped");

    let timeout_at = start + Duration::from_secs(config.timeout_seconds);
    let mut phase = Phase::Running;
    let mut next_deadline = timeout_at;
    let mut timed_out = false;
    let mut cancelled = false;
    let mut cancel_open = true;
    let mut orphaned = false;
    let mut io_error: Option<String> = None;

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut exit_status: Option<std::process::ExitStatus> = None;

    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];

    loop {
        if exit_status.is_some() && stdout_done && stderr_done {
            break;
        }

        tokio::select! {
            result = stdout.read(&mut stdout_buf), if !stdout_done => {
                match result {
                    Ok(0) => stdout_done = true,
                    Ok(n) => stdout_ring.push_bytes(&stdout_buf[..n]),
                    Err(e) => {
                        io_error.get_or_insert(format!("stdout read failed: {e}"));
                        stdout_done = true;
                    }
                }
            }
            result = stderr.read(&mut stderr_buf), if !stderr_done => {
                match result {
                    Ok(0) => stderr_done = true,
                    Ok(n) => stderr_ring.push_bytes(&stderr_buf[..n]),
                    Err(e) => {
                        io_error.get_or_insert(format!("stderr read failed: {e}"));
                        stderr_done = true;
                    }
                }
            }
            status = child.wait(), if exit_status.is_none() => {
                match status {
                    Ok(status) => {
                        exit_status = Some(status);
                        // The child is gone; allow the pipes a short drain
                        // window in case a descendant still holds them.
                        next_deadline = next_deadline.min(Instant::now() + DRAIN_GRACE);
                    }
                    Err(e) => {
                        io_error.get_or_insert(format!("wait failed: {e}"));
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(next_deadline) => {
                if exit_status.is_some() {
                    debug!(
                        index = spec.index,
                        "child exited but pipes stayed open; dropping them"
                    );
                    break;
                }
                match phase {
                    Phase::Running => {
                        timed_out = true;
                        warn!(
                            index = spec.index,
                            timeout_secs = config.timeout_seconds,
                            "task timed out; sending SIGTERM"
                        );
                        signal_child(pid, config.use_process_groups, libc::SIGTERM);
                        phase = Phase::TermSent;
                        next_deadline = Instant::now() + TERM_GRACE;
                    }
                    Phase::TermSent => {
                        warn!(index = spec.index, "grace expired; sending SIGKILL");
                        signal_child(pid, config.use_process_groups, libc::SIGKILL);
                        phase = Phase::Killed;
                        next_deadline = Instant::now() + KILL_WAIT;
                    }
                    Phase::Killed => {
                        warn!(
                            index = spec.index,
                            pid,
                            "process group survived SIGKILL; reporting orphans"
                        );
                        orphaned = true;
                        break;
                    }
                }
            }
            changed = cancel.changed(), if cancel_open && phase != Phase::Killed => {
                match changed {
                    Err(_) => cancel_open = false,
                    Ok(()) => {
                        let level = *cancel.borrow_and_update();
                        match level {
                            CancelRequest::Graceful if phase == Phase::Running => {
                                cancelled = true;
                                signal_child(pid, config.use_process_groups, libc::SIGTERM);
                                phase = Phase::TermSent;
                                next_deadline = Instant::now() + TERM_GRACE;
                            }
                            CancelRequest::Kill => {
                                cancelled = true;
                                signal_child(pid, config.use_process_groups, libc::SIGKILL);
                                phase = Phase::Killed;
                                next_deadline = Instant::now() + KILL_WAIT;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    let (peak_memory_mb, peak_cpu_percent) = match monitor {
        Some(monitor) => {
            let peak = monitor.stop().await;
            (Some(peak.memory_mb), Some(peak.cpu_percent))
        }
        None => (None, None),
    };

    let stdout_capture = StreamCapture::from_ring(stdout_ring);
    let stderr_capture = StreamCapture::from_ring(stderr_ring);

    let (status, exit_code, error_message) = classify(
        exit_status,
        timed_out,
        cancelled,
        orphaned,
        io_error,
        config.timeout_seconds,
    );

    let ended_at = Utc::now();
    TaskResult {
        worker_id: request.worker_id,
        status,
        exit_code,
        started_at,
        ended_at,
        duration_seconds: start.elapsed().as_secs_f64(),
        stdout: stdout_capture,
        stderr: stderr_capture,
        peak_memory_mb,
        peak_cpu_percent,
        error_message,
        spec: spec.clone(),
    }
}

fn build_command(spec: &TaskSpec, config: &ResolvedConfig, working_directory: &Path) -> Command {
    let mut command = Command::new(&spec.argv[0]);
    command.args(&spec.argv[1..]);
    for (name, value) in &spec.env_bindings {
        command.env(name, value);
    }
    command.current_dir(working_directory);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    // Make the child a process-group leader so one signal reaches every
    // descendant.
    // SAFETY: setsid() is async-signal-safe and runs between fork and exec.
    #[cfg(unix)]
    if config.use_process_groups {
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    command
}

fn signal_child(pid: Option<u32>, use_process_groups: bool, signal: libc::c_int) {
    let Some(pid) = pid else { return };

    #[cfg(unix)]
    {
        let target = if use_process_groups {
            -(pid as i32)
        } else {
            pid as i32
        };
        // SAFETY: kill() is async-signal-safe; a negative PID targets the
        // process group.
        unsafe {
            libc::kill(target, signal);
        }
    }
    #[cfg(not(unix))]
    let _ = (pid, use_process_groups, signal);
}

fn classify(
    exit_status: Option<std::process::ExitStatus>,
    timed_out: bool,
    cancelled: bool,
    orphaned: bool,
    io_error: Option<String>,
    timeout_seconds: u64,
) -> (TaskStatus, Option<i32>, Option<String>) {
    let exit_code = exit_status.and_then(|s| s.code());

    if timed_out {
        return (
            TaskStatus::Timeout,
            exit_code,
            Some(format!("Timeout after {timeout_seconds}s")),
        );
    }
    if cancelled {
        return (TaskStatus::Cancelled, exit_code, Some("Cancelled".to_string()));
    }
    if orphaned {
        return (
            TaskStatus::Failed,
            exit_code,
            Some("process group did not exit after SIGKILL".to_string()),
        );
    }

    match exit_status {
        Some(status) if status.success() => match io_error {
            // The child exited cleanly but we lost part of its output.
            Some(diagnostic) => (TaskStatus::Failed, exit_code, Some(diagnostic)),
            None => (TaskStatus::Success, exit_code, None),
        },
        Some(status) => match status.code() {
            Some(code) => (
                TaskStatus::Failed,
                Some(code),
                Some(format!("exit code {code}")),
            ),
            None => (
                TaskStatus::Failed,
                None,
                Some(signal_diagnostic(status)),
            ),
        },
        None => (
            TaskStatus::Failed,
            None,
            Some(io_error.unwrap_or_else(|| "child exit status unavailable".to_string())),
        ),
    }
}

#[cfg(unix)]
fn signal_diagnostic(status: std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("terminated by signal {signal}"),
        None => "terminated abnormally".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_diagnostic(_status: std::process::ExitStatus) -> String {
    "terminated abnormally".to_string()
}

fn launch_error_result(
    request: RunRequest<'_>,
    started_at: DateTime<Utc>,
    start: Instant,
    diagnostic: String,
) -> TaskResult {
    TaskResult {
        worker_id: request.worker_id,
        status: TaskStatus::LaunchError,
        exit_code: None,
        started_at,
        ended_at: Utc::now(),
        duration_seconds: start.elapsed().as_secs_f64(),
        stdout: StreamCapture::default(),
        stderr: StreamCapture::default(),
        peak_memory_mb: None,
        peak_cpu_percent: None,
        error_message: Some(diagnostic),
        spec: request.spec.clone(),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
