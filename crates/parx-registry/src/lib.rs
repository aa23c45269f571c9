//! Cross-instance PID registry: a shared line-delimited JSON file protected
//! by `flock(2)`.
//!
//! Uses raw `libc::flock` on a sidecar lock file rather than locking the
//! registry itself, so a mutation can atomically replace the registry via
//! rename without dropping the lock. `Drop` releases with `LOCK_UN`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const REGISTRY_VERSION: u8 = 1;
const KILL_WAIT: Duration = Duration::from_secs(3);
const KILL_POLL: Duration = Duration::from_millis(100);

/// One running instance, as recorded in the registry file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Format version.
    pub v: u8,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub log_file: String,
    pub result_file: String,
}

impl RegistryEntry {
    pub fn new(pid: u32, started_at: DateTime<Utc>, log_file: String, result_file: String) -> Self {
        Self {
            v: REGISTRY_VERSION,
            pid,
            started_at,
            log_file,
            result_file,
        }
    }
}

/// Handle to the shared registry file.
#[derive(Clone, Debug)]
pub struct Registry {
    path: PathBuf,
}

/// Advisory lock held for the duration of one registry operation.
struct RegistryLock {
    file: File,
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `self.file`. LOCK_UN
        // releases the advisory lock; closing the fd moments later would
        // release it anyway.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl Registry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry for a newly started instance.
    pub fn register(&self, entry: &RegistryEntry) -> Result<()> {
        let _lock = self.lock()?;
        let line = serde_json::to_string(entry).context("Failed to serialize registry entry")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open registry: {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to append registry entry")?;
        Ok(())
    }

    /// Remove every entry for `pid`. Deletes the file when it ends empty.
    pub fn unregister(&self, pid: u32) -> Result<()> {
        let _lock = self.lock()?;
        let entries = self.read_entries();
        let remaining: Vec<RegistryEntry> =
            entries.into_iter().filter(|e| e.pid != pid).collect();
        self.rewrite(&remaining)
    }

    /// Drop entries whose PID no longer exists; returns the live ones.
    ///
    /// Runs at every startup, so an instance that died without
    /// unregistering is cleaned up by the next one.
    pub fn reap_stale(&self) -> Result<Vec<RegistryEntry>> {
        let _lock = self.lock()?;
        let entries = self.read_entries();
        let live: Vec<RegistryEntry> = entries
            .into_iter()
            .filter(|e| {
                let alive = pid_alive(e.pid);
                if !alive {
                    warn!(pid = e.pid, "reaping stale registry entry");
                }
                alive
            })
            .collect();
        self.rewrite(&live)?;
        Ok(live)
    }

    /// Reap, then return all live entries.
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        self.reap_stale()
    }

    /// Terminate a registered instance: SIGTERM, up to 3 s of grace, then
    /// SIGKILL. The entry is removed regardless of how the process died.
    pub fn kill(&self, pid: u32) -> Result<()> {
        let entries = self.list()?;
        if !entries.iter().any(|e| e.pid == pid) {
            bail!("No registry entry for PID {pid}");
        }

        send_signal(pid, libc::SIGTERM);
        let deadline = Instant::now() + KILL_WAIT;
        while pid_alive(pid) && Instant::now() < deadline {
            std::thread::sleep(KILL_POLL);
        }
        if pid_alive(pid) {
            warn!(pid, "did not exit after SIGTERM; sending SIGKILL");
            send_signal(pid, libc::SIGKILL);
        }

        self.unregister(pid)
    }

    /// Kill every live instance. Refuses without explicit confirmation.
    pub fn kill_all(&self, confirmed: bool) -> Result<Vec<u32>> {
        if !confirmed {
            bail!("kill-all requires confirmation");
        }

        let mut killed = Vec::new();
        for entry in self.list()? {
            match self.kill(entry.pid) {
                Ok(()) => killed.push(entry.pid),
                Err(e) => warn!(pid = entry.pid, error = %e, "failed to kill instance"),
            }
        }
        Ok(killed)
    }

    /// Acquire the blocking exclusive lock serializing all mutations and
    /// snapshots.
    fn lock(&self) -> Result<RegistryLock> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create registry directory: {}", parent.display())
            })?;
        }

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open registry lock: {}", lock_path.display()))?;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor from the file just opened.
        // LOCK_EX without LOCK_NB blocks until the lock is granted.
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if ret != 0 {
            bail!(
                "flock failed on {}: {}",
                lock_path.display(),
                std::io::Error::last_os_error()
            );
        }

        Ok(RegistryLock { file })
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Read all parseable entries. Malformed lines are dropped with a
    /// warning; the next rewrite discards them for good.
    fn read_entries(&self) -> Vec<RegistryEntry> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read registry");
                return Vec::new();
            }
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<RegistryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "dropping malformed registry line");
                    None
                }
            })
            .collect()
    }

    /// Replace the registry contents atomically (write temp + rename).
    /// Caller must hold the lock.
    fn rewrite(&self, entries: &[RegistryEntry]) -> Result<()> {
        if entries.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to remove empty registry: {}", self.path.display())
                    });
                }
            }
            return Ok(());
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        for entry in entries {
            let line =
                serde_json::to_string(entry).context("Failed to serialize registry entry")?;
            writeln!(tmp, "{line}")?;
        }
        tmp.flush()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace registry: {}", self.path.display()))?;
        Ok(())
    }
}

/// Registry membership guard: unregisters this process on drop, so every
/// exit path that unwinds releases the entry. Aborts are covered by the
/// reaping pass of the next startup.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: Registry,
    pid: u32,
}

impl RegistryGuard {
    /// Reap stale entries, then register `pid`.
    pub fn acquire(registry: Registry, entry: RegistryEntry) -> Result<Self> {
        let pid = entry.pid;
        if let Err(e) = registry.reap_stale() {
            warn!(error = %e, "startup reap failed");
        }
        registry.register(&entry)?;
        Ok(Self { registry, pid })
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.registry.unregister(self.pid) {
            warn!(pid = self.pid, error = %e, "failed to unregister");
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only performs the existence/permission
    // check. EPERM means the process exists but belongs to someone else.
    let ret = unsafe { libc::kill(pid as i32, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_signal(pid: u32, signal: libc::c_int) {
    // SAFETY: plain kill(2) on a known PID.
    unsafe {
        libc::kill(pid as i32, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> Registry {
        Registry::new(dir.join("pids").join("registry"))
    }

    fn entry(pid: u32) -> RegistryEntry {
        RegistryEntry::new(
            pid,
            Utc::now(),
            format!("parx_p{pid}.log"),
            format!("parx_p{pid}_results.jsonl"),
        )
    }

    /// A PID that cannot exist: beyond any real pid_max.
    const DEAD_PID: u32 = 999_999_99;

    #[test]
    fn test_register_and_list() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        reg.register(&entry(own)).unwrap();
        let entries = reg.list().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, own);
        assert_eq!(entries[0].v, 1);
    }

    #[test]
    fn test_unregister_removes_entry_and_file() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        reg.register(&entry(own)).unwrap();
        assert!(reg.path().exists());

        reg.unregister(own).unwrap();
        assert!(!reg.path().exists(), "empty registry should be removed");
    }

    #[test]
    fn test_unregister_keeps_other_entries() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        reg.register(&entry(own)).unwrap();
        reg.register(&entry(own + 1)).unwrap();
        reg.unregister(own + 1).unwrap();

        // The other pid is fictional, so bypass reaping and read raw.
        let contents = fs::read_to_string(reg.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains(&format!("\"pid\":{own}")));
    }

    #[test]
    fn test_reap_drops_dead_pids() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        reg.register(&entry(own)).unwrap();
        reg.register(&entry(DEAD_PID)).unwrap();

        let live = reg.reap_stale().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, own);
    }

    #[test]
    fn test_reap_is_idempotent() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        reg.register(&entry(own)).unwrap();
        reg.register(&entry(DEAD_PID)).unwrap();

        let first = reg.reap_stale().unwrap();
        let contents_after_first = fs::read_to_string(reg.path()).unwrap();
        let second = reg.reap_stale().unwrap();
        let contents_after_second = fs::read_to_string(reg.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(contents_after_first, contents_after_second);
    }

    #[test]
    fn test_list_of_missing_file_is_empty() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        reg.register(&entry(own)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(reg.path()).unwrap();
            writeln!(file, "not json at all").unwrap();
        }

        let entries = reg.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, own);
    }

    #[test]
    fn test_kill_unknown_pid_fails() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let err = reg.kill(DEAD_PID).unwrap_err();
        assert!(err.to_string().contains("No registry entry"));
    }

    #[test]
    fn test_kill_terminates_and_unregisters() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());

        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();
        reg.register(&entry(pid)).unwrap();

        reg.kill(pid).unwrap();

        // The child is either gone or a zombie awaiting reap; after waiting
        // on it, it must be fully dead.
        let mut child = child;
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn test_kill_all_requires_confirmation() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let err = reg.kill_all(false).unwrap_err();
        assert!(err.to_string().contains("confirmation"));
    }

    #[test]
    fn test_guard_registers_and_releases() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        {
            let _guard = RegistryGuard::acquire(reg.clone(), entry(own)).unwrap();
            assert_eq!(reg.list().unwrap().len(), 1);
        }

        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn test_guard_startup_reaps_previous_crash() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path());
        let own = std::process::id();

        // A crashed instance left its entry behind.
        reg.register(&entry(DEAD_PID)).unwrap();

        let _guard = RegistryGuard::acquire(reg.clone(), entry(own)).unwrap();
        let entries = reg.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, own);
    }

    #[test]
    fn test_entry_roundtrip_preserves_fields() {
        let original = entry(1234);
        let json = serde_json::to_string(&original).unwrap();
        assert!(json.contains("\"v\":1"));
        let parsed: RegistryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }
}
