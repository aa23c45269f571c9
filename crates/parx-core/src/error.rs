#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Invalid configuration: {field} = {value} (allowed: {allowed})")]
    InvalidConfig {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("inconsistent argument counts: line {line} has {found} fields, expected {expected}")]
    InconsistentArgumentCounts {
        line: usize,
        found: usize,
        expected: usize,
    },

    #[error("placeholder index out of range: {placeholders} (only {available} argument fields)")]
    PlaceholderOutOfRange {
        placeholders: String,
        available: usize,
    },

    #[error("unmatched argument placeholder: {0}")]
    UnmatchedPlaceholder(String),

    #[error("--separator requires an arguments file")]
    SeparatorWithoutArgumentsFile,

    #[error("more env var names ({names}) than argument fields ({fields})")]
    TooManyEnvNames { names: usize, fields: usize },

    #[error("no task sources and no arguments file; nothing to run")]
    NoInputs,

    #[error("no task files found in '{0}'")]
    EmptyTaskSource(String),

    #[error("invalid task source pattern '{pattern}': {reason}")]
    InvalidTaskSource { pattern: String, reason: String },

    #[error("'{0}' is not a regular file")]
    NotARegularFile(String),

    #[error("task file '{path}' too large: {size} bytes (limit: {limit})")]
    TaskFileTooLarge {
        path: String,
        size: u64,
        limit: u64,
    },

    #[error("argument too long ({len} chars, limit {max}): {preview}...")]
    ArgumentTooLong {
        len: usize,
        max: usize,
        preview: String,
    },

    #[error("command template produced an empty argv")]
    EmptyCommand,

    #[error("invalid command template: {0}")]
    TemplateParse(String),

    #[error("No registry entry for PID {0}")]
    PidNotRegistered(u32),

    #[error("User data directory could not be resolved")]
    DataRootUnavailable,
}
