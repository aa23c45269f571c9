use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::AppError;

/// XDG app name for all persisted state.
pub const APP_NAME: &str = "parx";

/// Per-user data root: `~/.local/state/parx` on Linux, with a fallback to
/// the local data dir on platforms without a state dir.
pub fn data_root() -> Result<PathBuf, AppError> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .to_path_buf()
        })
        .ok_or(AppError::DataRootUnavailable)
}

/// The shared PID registry file, one per installation.
pub fn registry_path() -> Result<PathBuf, AppError> {
    Ok(data_root()?.join("pids").join("registry"))
}

/// Session base identifier: PID plus a sortable UTC timestamp.
///
/// Two sessions of the same process cannot collide because the timestamp
/// carries sub-second precision, and two concurrent processes differ in PID.
pub fn session_base(pid: u32, started_at: DateTime<Utc>) -> String {
    format!(
        "{}_p{}_{}",
        APP_NAME,
        pid,
        started_at.format("%Y%m%d_%H%M%S_%3f")
    )
}

/// Resolved file layout for one session under the data root.
#[derive(Clone, Debug)]
pub struct SessionPaths {
    root: PathBuf,
    base: String,
    pid: u32,
}

impl SessionPaths {
    pub fn new(pid: u32, started_at: DateTime<Utc>) -> Result<Self, AppError> {
        Ok(Self::with_root(data_root()?, pid, started_at))
    }

    /// Build against an explicit root. Tests use this with a tempdir.
    pub fn with_root(root: PathBuf, pid: u32, started_at: DateTime<Utc>) -> Self {
        let base = session_base(pid, started_at);
        Self { root, base, pid }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("logs").join(format!("{}.log", self.base))
    }

    pub fn results_file(&self) -> PathBuf {
        self.root
            .join("logs")
            .join(format!("{}_results.jsonl", self.base))
    }

    pub fn output_log_file(&self) -> PathBuf {
        self.root
            .join("logs")
            .join(format!("{}_output.txt", self.base))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backups").join(&self.base)
    }

    /// The registry file is shared across all sessions of this user.
    pub fn registry_file(&self) -> PathBuf {
        self.root.join("pids").join("registry")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    /// Isolated per-worker directory: `workspace/pid{PID}_worker{N}`.
    pub fn worker_dir(&self, worker_id: u32) -> PathBuf {
        self.workspace_dir()
            .join(format!("pid{}_worker{}", self.pid, worker_id))
    }
}
