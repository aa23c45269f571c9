//! Terminal summary: counts by status plus duration and memory stats.

use std::fmt::Write as _;

use parx_core::TaskStatus;
use parx_process::TaskResult;

/// Accumulates per-task figures as results arrive and renders the final
/// summary once the session is done.
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    succeeded: usize,
    failed: usize,
    timed_out: usize,
    cancelled: usize,
    launch_errors: usize,
    durations: Vec<f64>,
    peak_memory: Vec<f64>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: &TaskResult) {
        match result.status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Timeout => self.timed_out += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::LaunchError => self.launch_errors += 1,
        }
        // Synthesized cancellations never ran; keep them out of the stats.
        if result.status != TaskStatus::Cancelled || result.duration_seconds > 0.0 {
            self.durations.push(result.duration_seconds);
        }
        if let Some(memory_mb) = result.peak_memory_mb {
            self.peak_memory.push(memory_mb);
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.cancelled + self.launch_errors
    }

    pub fn render(&self, wall_seconds: f64) -> String {
        let mut out = String::new();

        let _ = writeln!(out);
        let _ = writeln!(out, "=== Execution Summary ===");
        let _ = writeln!(out, "Total:        {}", self.total());
        let _ = writeln!(out, "Success:      {}", self.succeeded);
        let _ = writeln!(out, "Failed:       {}", self.failed);
        let _ = writeln!(out, "Timeout:      {}", self.timed_out);
        let _ = writeln!(out, "Cancelled:    {}", self.cancelled);
        let _ = writeln!(out, "Launch error: {}", self.launch_errors);
        let _ = writeln!(out, "Wall time:    {wall_seconds:.2}s");

        if let Some((min, mean, max)) = stats(&self.durations) {
            let _ = writeln!(
                out,
                "Task time:    min {min:.2}s / mean {mean:.2}s / max {max:.2}s"
            );
        }
        if let Some((_, mean, max)) = stats(&self.peak_memory) {
            let _ = writeln!(out, "Peak memory:  mean {mean:.1} MB / max {max:.1} MB");
        }

        out
    }
}

fn stats(values: &[f64]) -> Option<(f64, f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((min, mean, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parx_expand::TaskSpec;
    use parx_process::StreamCapture;

    fn result(status: TaskStatus, duration: f64, memory: Option<f64>) -> TaskResult {
        let now = Utc::now();
        TaskResult {
            worker_id: 1,
            status,
            exit_code: None,
            started_at: now,
            ended_at: now,
            duration_seconds: duration,
            stdout: StreamCapture::default(),
            stderr: StreamCapture::default(),
            peak_memory_mb: memory,
            peak_cpu_percent: None,
            error_message: None,
            spec: TaskSpec {
                index: 1,
                total: 1,
                task_file_path: None,
                argv: vec!["true".into()],
                env_bindings: Vec::new(),
                arguments: Vec::new(),
                working_directory: std::env::temp_dir(),
            },
        }
    }

    #[test]
    fn test_counts_by_status() {
        let mut summary = SummaryBuilder::new();
        summary.add(&result(TaskStatus::Success, 1.0, None));
        summary.add(&result(TaskStatus::Success, 2.0, None));
        summary.add(&result(TaskStatus::Failed, 0.5, None));
        summary.add(&result(TaskStatus::Cancelled, 0.0, None));

        let rendered = summary.render(3.5);
        assert!(rendered.contains("Total:        4"));
        assert!(rendered.contains("Success:      2"));
        assert!(rendered.contains("Failed:       1"));
        assert!(rendered.contains("Cancelled:    1"));
    }

    #[test]
    fn test_duration_stats() {
        let mut summary = SummaryBuilder::new();
        summary.add(&result(TaskStatus::Success, 1.0, None));
        summary.add(&result(TaskStatus::Success, 3.0, None));

        let rendered = summary.render(4.0);
        assert!(
            rendered.contains("min 1.00s / mean 2.00s / max 3.00s"),
            "{rendered}"
        );
    }

    #[test]
    fn test_memory_stats_only_when_observed() {
        let mut summary = SummaryBuilder::new();
        summary.add(&result(TaskStatus::Success, 1.0, None));
        assert!(!summary.render(1.0).contains("Peak memory"));

        summary.add(&result(TaskStatus::Success, 1.0, Some(64.0)));
        let rendered = summary.render(2.0);
        assert!(rendered.contains("Peak memory"), "{rendered}");
        assert!(rendered.contains("max 64.0 MB"), "{rendered}");
    }

    #[test]
    fn test_empty_summary_renders() {
        let summary = SummaryBuilder::new();
        let rendered = summary.render(0.0);
        assert!(rendered.contains("Total:        0"));
        assert!(!rendered.contains("Task time"));
    }
}
