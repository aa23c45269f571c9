use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Final status of one task execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
    LaunchError,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::LaunchError => "LAUNCH_ERROR",
        }
    }

    /// Whether this outcome counts against the failure limits.
    ///
    /// CANCELLED is neutral: it neither counts as a failure nor resets
    /// the consecutive-failure counter.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout | Self::LaunchError)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the scheduler stopped dispatching new tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT received.
    Signal,
    /// The failure policy tripped.
    StopLimit,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal => write!(f, "SIGNAL"),
            Self::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

/// Field separator for the arguments file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    /// One or more ASCII spaces.
    Space,
    /// Any run of whitespace.
    Whitespace,
    Tab,
    Comma,
    Semicolon,
    Pipe,
    Colon,
}

impl Separator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Space => "space",
            Self::Whitespace => "whitespace",
            Self::Tab => "tab",
            Self::Comma => "comma",
            Self::Semicolon => "semicolon",
            Self::Pipe => "pipe",
            Self::Colon => "colon",
        }
    }

    /// Split one arguments-file line into fields.
    ///
    /// `Space` and `Whitespace` collapse runs of their delimiter, so they
    /// never produce empty fields. The single-character separators keep
    /// empty fields ("a,,b" has three fields).
    pub fn split(&self, line: &str) -> Vec<String> {
        match self {
            Self::Space => line
                .split(' ')
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect(),
            Self::Whitespace => line.split_whitespace().map(str::to_string).collect(),
            Self::Tab => split_on(line, '\t'),
            Self::Comma => split_on(line, ','),
            Self::Semicolon => split_on(line, ';'),
            Self::Pipe => split_on(line, '|'),
            Self::Colon => split_on(line, ':'),
        }
    }
}

impl std::fmt::Display for Separator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn split_on(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::LaunchError).unwrap(),
            "\"LAUNCH_ERROR\""
        );
    }

    #[test]
    fn test_status_failure_classification() {
        assert!(TaskStatus::Failed.is_failure());
        assert!(TaskStatus::Timeout.is_failure());
        assert!(TaskStatus::LaunchError.is_failure());
        assert!(!TaskStatus::Success.is_failure());
        assert!(!TaskStatus::Cancelled.is_failure());
    }

    #[test]
    fn test_space_separator_collapses_runs() {
        assert_eq!(
            Separator::Space.split("a   b  c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_space_separator_ignores_leading_trailing() {
        assert_eq!(Separator::Space.split("  a b "), vec!["a", "b"]);
    }

    #[test]
    fn test_whitespace_separator_handles_tabs_and_spaces() {
        assert_eq!(
            Separator::Whitespace.split("a\t b \t c"),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_comma_separator_keeps_empty_fields() {
        assert_eq!(Separator::Comma.split("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_pipe_separator() {
        assert_eq!(Separator::Pipe.split("x|y|z"), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_colon_separator() {
        assert_eq!(Separator::Colon.split("host:9000"), vec!["host", "9000"]);
    }

    #[test]
    fn test_single_field_line() {
        assert_eq!(Separator::Comma.split("alpha"), vec!["alpha"]);
    }
}
