//! Input expansion: task discovery, arguments-file parsing, and placeholder
//! resolution into a finite, ordered sequence of ready-to-exec task specs.

mod arguments;
mod sources;
mod template;

pub use arguments::ArgumentRows;

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use parx_core::{AppError, ResolvedConfig, Separator};

/// What to expand: the command template plus its input sources.
#[derive(Clone, Debug)]
pub struct ExpandRequest {
    /// Command template, possibly containing `@TASK@`, `@ARG@`, `@ARG_i@`.
    pub command_template: String,
    /// Task sources: directories, files, or glob patterns.
    pub task_sources: Vec<String>,
    pub arguments_file: Option<PathBuf>,
    pub separator: Option<Separator>,
    /// Env var names bound positionally to argument fields.
    pub env_names: Vec<String>,
    /// Case-insensitive extension filter, e.g. "txt".
    pub extension_filter: Option<String>,
    /// Shared working directory for child processes.
    pub working_directory: PathBuf,
}

/// One fully resolved unit of work, read-only after expansion.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    /// 1-based ordinal in dispatch order.
    pub index: usize,
    pub total: usize,
    /// Absent in arguments-only mode.
    pub task_file_path: Option<PathBuf>,
    /// Tokenized command with all placeholders substituted.
    pub argv: Vec<String>,
    /// Ordered name -> value pairs set in the child environment.
    pub env_bindings: Vec<(String, String)>,
    /// Raw argument tokens for this spec.
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
}

impl TaskSpec {
    /// The argv joined into a single printable string, shell-quoted where
    /// needed.
    pub fn command_display(&self) -> String {
        shell_words::join(self.argv.iter().map(String::as_str))
    }
}

/// Expand the request into the ordered task-spec sequence.
///
/// Ordering: task files sorted lexicographically; argument lines in file
/// order; when both are present, the Cartesian product in (file-major,
/// line-minor) order.
pub fn expand(request: &ExpandRequest, config: &ResolvedConfig) -> Result<Vec<TaskSpec>> {
    if request.separator.is_some() && request.arguments_file.is_none() {
        return Err(AppError::SeparatorWithoutArgumentsFile.into());
    }
    if request.task_sources.is_empty() && request.arguments_file.is_none() {
        return Err(AppError::NoInputs.into());
    }
    if request.arguments_file.is_none() && template::references_arguments(&request.command_template)
    {
        return Err(AppError::UnmatchedPlaceholder(
            template::first_argument_placeholder(&request.command_template)
                .unwrap_or_else(|| "@ARG@".to_string()),
        )
        .into());
    }

    let task_files = if request.task_sources.is_empty() {
        Vec::new()
    } else {
        sources::discover(
            &request.task_sources,
            request.extension_filter.as_deref(),
            config.max_file_size_bytes,
        )?
    };

    let rows = match &request.arguments_file {
        Some(path) => {
            let rows = arguments::parse_arguments_file(path, request.separator)?;
            check_env_bindings(&request.env_names, rows.field_count)?;
            Some(rows)
        }
        None => None,
    };

    let mut specs = Vec::new();
    match (&task_files[..], rows) {
        (files, None) => {
            for file in files {
                specs.push(build_spec(request, config, Some(file.clone()), Vec::new())?);
            }
        }
        ([], Some(rows)) => {
            for row in rows.rows {
                specs.push(build_spec(request, config, None, row)?);
            }
        }
        (files, Some(rows)) => {
            // File-major, line-minor product.
            for file in files {
                for row in &rows.rows {
                    specs.push(build_spec(request, config, Some(file.clone()), row.clone())?);
                }
            }
        }
    }

    let total = specs.len();
    for (position, spec) in specs.iter_mut().enumerate() {
        spec.index = position + 1;
        spec.total = total;
    }

    Ok(specs)
}

fn build_spec(
    request: &ExpandRequest,
    config: &ResolvedConfig,
    task_file_path: Option<PathBuf>,
    arguments: Vec<String>,
) -> Result<TaskSpec> {
    let argv = template::resolve(
        &request.command_template,
        task_file_path.as_deref(),
        &arguments,
        config.max_argument_length,
    )?;

    let env_bindings = request
        .env_names
        .iter()
        .zip(arguments.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok(TaskSpec {
        index: 0,
        total: 0,
        task_file_path,
        argv,
        env_bindings,
        arguments,
        working_directory: request.working_directory.clone(),
    })
}

fn check_env_bindings(env_names: &[String], field_count: usize) -> Result<()> {
    if env_names.len() > field_count {
        return Err(AppError::TooManyEnvNames {
            names: env_names.len(),
            fields: field_count,
        }
        .into());
    }
    if !env_names.is_empty() && env_names.len() < field_count {
        warn!(
            env_names = env_names.len(),
            fields = field_count,
            "fewer env var names than argument fields; trailing fields are not exported"
        );
    }
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
