//! Structured result sink: one session record followed by one JSONL record
//! per completed task, plus the optional human-readable output log,
//! best-effort input backups, and the terminal summary.

pub mod backup;
pub mod output_log;
pub mod summary;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use parx_core::{ResolvedConfig, TaskStatus};
use parx_process::TaskResult;

/// Identity of one scheduler invocation, embedded in every record.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub pid: u32,
    pub hostname: String,
    pub user: String,
    pub command_template: String,
    pub started_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(command_template: String) -> Self {
        Self {
            session_id: ulid::Ulid::new().to_string(),
            pid: std::process::id(),
            hostname: whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string()),
            user: whoami::username(),
            command_template,
            started_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct SessionRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    session_id: &'a str,
    pid: u32,
    hostname: &'a str,
    user: &'a str,
    command_template: &'a str,
    started_at: String,
    config: &'a ResolvedConfig,
}

#[derive(Serialize)]
struct TaskRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    session_id: &'a str,
    task_index: usize,
    status: TaskStatus,
    worker_id: u32,
    start_time: String,
    end_time: String,
    duration_seconds: f64,
    task_file: Option<String>,
    command_executed: String,
    env_vars: serde_json::Map<String, serde_json::Value>,
    arguments: &'a [String],
    exit_code: Option<i32>,
    memory_mb: Option<f64>,
    cpu_percent: Option<f64>,
    error_message: &'a str,
}

/// Append-only line-delimited JSON writer.
///
/// Never fails the session: write problems are logged and counted, and
/// whatever was already written stays on disk. The session record is the
/// first line, written at creation.
pub struct ResultSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    session_id: String,
    lines_written: u64,
    write_failures: u64,
}

impl ResultSink {
    pub fn create(path: &Path, session: &SessionInfo, config: &ResolvedConfig) -> Self {
        let writer = match open_append(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open results file");
                None
            }
        };

        let mut sink = Self {
            path: path.to_path_buf(),
            writer,
            session_id: session.session_id.clone(),
            lines_written: 0,
            write_failures: 0,
        };

        let record = SessionRecord {
            record_type: "session",
            session_id: &session.session_id,
            pid: session.pid,
            hostname: &session.hostname,
            user: &session.user,
            command_template: &session.command_template,
            started_at: format_time(session.started_at),
            config,
        };
        sink.write_record(&record);
        sink
    }

    /// Append one task record.
    pub fn record_task(&mut self, result: &TaskResult) {
        let env_vars: serde_json::Map<String, serde_json::Value> = result
            .spec
            .env_bindings
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();

        let session_id = self.session_id.clone();
        let record = TaskRecord {
            record_type: "task",
            session_id: &session_id,
            task_index: result.spec.index,
            status: result.status,
            worker_id: result.worker_id,
            start_time: format_time(result.started_at),
            end_time: format_time(result.ended_at),
            duration_seconds: result.duration_seconds,
            task_file: result
                .spec
                .task_file_path
                .as_ref()
                .map(|p| p.display().to_string()),
            command_executed: result.spec.command_display(),
            env_vars,
            arguments: &result.spec.arguments,
            exit_code: result.exit_code,
            memory_mb: result.peak_memory_mb,
            cpu_percent: result.peak_cpu_percent,
            error_message: result.error_message.as_deref().unwrap_or(""),
        };
        self.write_record(&record);
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                self.write_failures += 1;
                warn!(path = %self.path.display(), error = %e, "failed to flush results");
            }
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    fn write_record<T: Serialize>(&mut self, record: &T) {
        let Some(writer) = self.writer.as_mut() else {
            self.write_failures += 1;
            return;
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                let result = writeln!(writer, "{line}").and_then(|_| writer.flush());
                match result {
                    Ok(()) => self.lines_written += 1,
                    Err(e) => {
                        self.write_failures += 1;
                        warn!(path = %self.path.display(), error = %e, "failed to write record");
                    }
                }
            }
            Err(e) => {
                self.write_failures += 1;
                warn!(error = %e, "failed to serialize record");
            }
        }
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
