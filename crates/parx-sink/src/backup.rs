//! Best-effort backup of session inputs. Failures are warnings only.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::SessionInfo;

/// Copy the input task files and arguments file into the backup directory
/// and drop a `session.json` metadata file next to them.
///
/// Nothing here can fail the session; every problem is reduced to a
/// warning and the run continues.
pub fn write_backups(
    backup_dir: &Path,
    task_files: &[PathBuf],
    arguments_file: Option<&Path>,
    session: &SessionInfo,
) {
    if let Err(e) = std::fs::create_dir_all(backup_dir) {
        warn!(path = %backup_dir.display(), error = %e, "failed to create backup directory");
        return;
    }

    for file in task_files {
        copy_into(backup_dir, file);
    }
    if let Some(file) = arguments_file {
        copy_into(backup_dir, file);
    }

    let metadata_path = backup_dir.join("session.json");
    match serde_json::to_string_pretty(session) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&metadata_path, json) {
                warn!(path = %metadata_path.display(), error = %e, "failed to write session metadata");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize session metadata"),
    }
}

fn copy_into(backup_dir: &Path, file: &Path) {
    let Some(name) = file.file_name() else {
        warn!(path = %file.display(), "skipping backup of nameless path");
        return;
    };
    let target = backup_dir.join(name);
    if let Err(e) = std::fs::copy(file, &target) {
        warn!(
            from = %file.display(),
            to = %target.display(),
            error = %e,
            "failed to back up input file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_backups_copy_inputs_and_metadata() {
        let tmp = tempdir().unwrap();
        let task = tmp.path().join("task1.txt");
        std::fs::File::create(&task)
            .unwrap()
            .write_all(b"payload")
            .unwrap();
        let args = tmp.path().join("args.csv");
        std::fs::File::create(&args)
            .unwrap()
            .write_all(b"a,b\n")
            .unwrap();

        let backup_dir = tmp.path().join("backups").join("session-1");
        let session = SessionInfo::new("echo @TASK@".to_string());
        write_backups(&backup_dir, &[task], Some(&args), &session);

        assert_eq!(
            std::fs::read_to_string(backup_dir.join("task1.txt")).unwrap(),
            "payload"
        );
        assert_eq!(
            std::fs::read_to_string(backup_dir.join("args.csv")).unwrap(),
            "a,b\n"
        );

        let metadata = std::fs::read_to_string(backup_dir.join("session.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(parsed["command_template"], "echo @TASK@");
        assert_eq!(parsed["session_id"], session.session_id.as_str());
    }

    #[test]
    fn test_missing_input_is_only_a_warning() {
        let tmp = tempdir().unwrap();
        let backup_dir = tmp.path().join("backups");
        let session = SessionInfo::new("true".to_string());

        // Must not panic or fail.
        write_backups(
            &backup_dir,
            &[PathBuf::from("/nonexistent/input.txt")],
            None,
            &session,
        );
        assert!(backup_dir.join("session.json").exists());
    }

    #[test]
    fn test_unwritable_backup_dir_is_tolerated() {
        let session = SessionInfo::new("true".to_string());
        write_backups(Path::new("/dev/null/backups"), &[], None, &session);
    }
}
