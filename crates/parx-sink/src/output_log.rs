//! Human-readable per-task output log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use tracing::warn;

use parx_process::{StreamCapture, TaskResult};

/// Appends one readable block per completed task. Best-effort: failures
/// are logged, never propagated.
pub struct OutputLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl OutputLog {
    pub fn create(path: &Path) -> Self {
        let writer = match open_append(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open output log");
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }

    pub fn record(&mut self, result: &TaskResult) {
        let block = render_block(result);
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(block.as_bytes()).and_then(|_| writer.flush()) {
            warn!(path = %self.path.display(), error = %e, "failed to write output log block");
        }
    }
}

impl Drop for OutputLog {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

fn render_block(result: &TaskResult) -> String {
    use std::fmt::Write as _;

    let spec = &result.spec;
    let mut block = String::new();

    let _ = writeln!(
        block,
        "==== Task {}/{} [{}] worker {} ====",
        spec.index, spec.total, result.status, result.worker_id
    );
    let _ = writeln!(block, "Command: {}", spec.command_display());
    if let Some(file) = &spec.task_file_path {
        let _ = writeln!(block, "Task file: {}", file.display());
    }
    if !spec.env_bindings.is_empty() {
        let bindings: Vec<String> = spec
            .env_bindings
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        let _ = writeln!(block, "Env: {}", bindings.join(" "));
    }
    let _ = writeln!(
        block,
        "Started: {}  Duration: {:.3}s",
        result
            .started_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        result.duration_seconds
    );
    if let Some(message) = &result.error_message {
        let _ = writeln!(block, "Error: {message}");
    }

    append_stream(&mut block, "stdout", &result.stdout);
    append_stream(&mut block, "stderr", &result.stderr);
    block.push('\n');
    block
}

fn append_stream(block: &mut String, name: &str, capture: &StreamCapture) {
    use std::fmt::Write as _;

    let marker = if capture.truncated {
        format!(
            " (last {} of {} chars)",
            capture.tail.chars().count(),
            capture.total_chars
        )
    } else {
        format!(" ({} chars)", capture.total_chars)
    };

    let _ = writeln!(block, "--- {name}{marker} ---");
    if !capture.tail.is_empty() {
        block.push_str(&capture.tail);
        if !capture.tail.ends_with('\n') {
            block.push('\n');
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
