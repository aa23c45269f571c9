//! Task-file discovery: directories, explicit files, and glob patterns.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use parx_core::AppError;

/// Discover and validate task files across all sources.
///
/// Each source is resolved independently (directory children, single file,
/// or glob expansion) and must yield at least one regular file after the
/// extension filter. The union is deduplicated and sorted lexicographically.
pub fn discover(
    sources: &[String],
    extension_filter: Option<&str>,
    max_file_size_bytes: u64,
) -> Result<Vec<PathBuf>> {
    let mut all = Vec::new();

    for source in sources {
        let mut files = resolve_source(source)?;
        if let Some(ext) = extension_filter {
            files.retain(|path| has_extension(path, ext));
        }
        if files.is_empty() {
            return Err(AppError::EmptyTaskSource(source.clone()).into());
        }
        all.extend(files);
    }

    let mut canonical = Vec::new();
    for path in all {
        let absolute = fs::canonicalize(&path)
            .with_context(|| format!("Failed to resolve task file: {}", path.display()))?;
        validate_task_file(&absolute, max_file_size_bytes)?;
        canonical.push(absolute);
    }

    canonical.sort();
    canonical.dedup();
    Ok(canonical)
}

fn resolve_source(source: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(source);

    if path.is_dir() {
        // Immediate children only, never recursive.
        let entries = fs::read_dir(path)
            .with_context(|| format!("Failed to read task directory: {}", path.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        return Ok(files);
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    // Neither a directory nor an existing file: treat as a glob pattern.
    let paths = glob::glob(source).map_err(|e| AppError::InvalidTaskSource {
        pattern: source.to_string(),
        reason: e.to_string(),
    })?;

    let mut files = Vec::new();
    for matched in paths {
        let matched = matched.map_err(|e| AppError::InvalidTaskSource {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        if matched.is_file() {
            files.push(matched);
        }
    }
    Ok(files)
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    let wanted = wanted.trim_start_matches('.');
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

fn validate_task_file(path: &Path, max_file_size_bytes: u64) -> Result<()> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to stat task file: {}", path.display()))?;

    if !metadata.is_file() {
        return Err(AppError::NotARegularFile(path.display().to_string()).into());
    }
    if metadata.len() > max_file_size_bytes {
        return Err(AppError::TaskFileTooLarge {
            path: path.display().to_string(),
            size: metadata.len(),
            limit: max_file_size_bytes,
        }
        .into());
    }

    // Readability probe; a file we cannot open would otherwise only fail
    // inside the child process.
    fs::File::open(path)
        .with_context(|| format!("Task file is not readable: {}", path.display()))?;

    Ok(())
}
