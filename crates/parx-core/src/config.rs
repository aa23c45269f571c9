use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Fully resolved execution configuration.
///
/// Built once by the caller (CLI flags, defaults) and validated before the
/// scheduler sees it. Immutable afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Upper bound on simultaneously running child processes.
    pub max_workers: u32,
    /// Per-task wall-clock timeout in seconds.
    pub timeout_seconds: u64,
    /// Bound on the scheduler's idle wait and the monitor sampling cadence.
    pub poll_wait_seconds: f64,
    /// Minimum delay between consecutive task launches.
    pub start_delay_seconds: f64,
    /// Characters retained per output stream (last-N semantics).
    pub max_output_capture: usize,

    pub stop_limits_enabled: bool,
    pub max_consecutive_failures: u32,
    pub max_failure_rate: f64,
    pub min_tasks_for_rate_check: u32,

    /// Give each worker its own subdirectory under the workspace.
    pub workspace_isolation: bool,
    /// Start each child as a process-group leader so signals reach the
    /// whole tree.
    pub use_process_groups: bool,
    pub max_file_size_bytes: u64,
    pub max_argument_length: usize,

    pub task_output_log_enabled: bool,
    pub backups_enabled: bool,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            timeout_seconds: 60,
            poll_wait_seconds: 0.1,
            start_delay_seconds: 0.0,
            max_output_capture: 1000,
            stop_limits_enabled: false,
            max_consecutive_failures: 5,
            max_failure_rate: 0.5,
            min_tasks_for_rate_check: 10,
            workspace_isolation: false,
            use_process_groups: true,
            max_file_size_bytes: 10 * 1024 * 1024,
            max_argument_length: 4096,
            task_output_log_enabled: true,
            backups_enabled: true,
        }
    }
}

impl ResolvedConfig {
    /// Check every field against its allowed range.
    ///
    /// Returns the first violation; the caller maps it to exit code 1
    /// before any task runs.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=100).contains(&self.max_workers) {
            return Err(invalid("max_workers", self.max_workers, "1..=100"));
        }
        if !(1..=3600).contains(&self.timeout_seconds) {
            return Err(invalid("timeout_seconds", self.timeout_seconds, "1..=3600"));
        }
        if !(0.01..=10.0).contains(&self.poll_wait_seconds) {
            return Err(invalid(
                "poll_wait_seconds",
                self.poll_wait_seconds,
                "0.01..=10.0",
            ));
        }
        if !(0.0..=60.0).contains(&self.start_delay_seconds) {
            return Err(invalid(
                "start_delay_seconds",
                self.start_delay_seconds,
                "0.0..=60.0",
            ));
        }
        if !(1..=10000).contains(&self.max_output_capture) {
            return Err(invalid(
                "max_output_capture",
                self.max_output_capture,
                "1..=10000",
            ));
        }
        if self.max_consecutive_failures < 1 {
            return Err(invalid(
                "max_consecutive_failures",
                self.max_consecutive_failures,
                ">= 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(invalid(
                "max_failure_rate",
                self.max_failure_rate,
                "0.0..=1.0",
            ));
        }
        if self.min_tasks_for_rate_check < 1 {
            return Err(invalid(
                "min_tasks_for_rate_check",
                self.min_tasks_for_rate_check,
                ">= 1",
            ));
        }
        if self.max_file_size_bytes == 0 {
            return Err(invalid("max_file_size_bytes", 0, "> 0"));
        }
        if self.max_argument_length == 0 {
            return Err(invalid("max_argument_length", 0, "> 0"));
        }
        Ok(())
    }
}

fn invalid(
    field: &'static str,
    value: impl std::fmt::Display,
    allowed: &'static str,
) -> AppError {
    AppError::InvalidConfig {
        field,
        value: value.to_string(),
        allowed,
    }
}
