//! Placeholder substitution and POSIX tokenization of the command template.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use parx_core::AppError;

const TASK_PLACEHOLDER: &str = "@TASK@";

/// `@ARG@` or `@ARG_i@`.
fn arg_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@ARG(?:_(\d+))?@").unwrap())
}

/// Anything placeholder-shaped that survived substitution.
fn leftover_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@ARG[^@]*@").unwrap())
}

pub fn references_arguments(template: &str) -> bool {
    leftover_pattern().is_match(template)
}

pub fn first_argument_placeholder(template: &str) -> Option<String> {
    leftover_pattern()
        .find(template)
        .map(|m| m.as_str().to_string())
}

/// Substitute placeholders and split into an argv.
///
/// Substitution is textual; the result is then parsed with POSIX shell
/// word splitting, so a quoted placeholder keeps a space-containing value
/// inside one token.
pub fn resolve(
    template: &str,
    task_file: Option<&Path>,
    arguments: &[String],
    max_argument_length: usize,
) -> Result<Vec<String>> {
    check_indices(template, arguments.len())?;

    let substituted = arg_pattern().replace_all(template, |caps: &regex::Captures<'_>| {
        let index = placeholder_index(caps);
        arguments[index - 1].clone()
    });

    let task_value = task_file
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    let substituted = substituted.replace(TASK_PLACEHOLDER, &task_value);

    if let Some(leftover) = leftover_pattern().find(&substituted) {
        return Err(AppError::UnmatchedPlaceholder(leftover.as_str().to_string()).into());
    }

    let tokens = shell_words::split(&substituted)
        .map_err(|e| AppError::TemplateParse(e.to_string()))?;

    // An omitted @TASK@ (arguments-only mode) leaves an empty token behind
    // when the placeholder stood alone; drop those rather than passing
    // empty argv entries to the child.
    let argv: Vec<String> = tokens.into_iter().filter(|t| !t.is_empty()).collect();

    if argv.is_empty() {
        return Err(AppError::EmptyCommand.into());
    }

    for token in &argv {
        if token.len() > max_argument_length {
            return Err(AppError::ArgumentTooLong {
                len: token.len(),
                max: max_argument_length,
                preview: token.chars().take(32).collect(),
            }
            .into());
        }
    }

    Ok(argv)
}

fn placeholder_index(caps: &regex::Captures<'_>) -> usize {
    caps.get(1)
        .map(|m| m.as_str().parse::<usize>().unwrap_or(0))
        .unwrap_or(1)
}

/// Reject out-of-range `@ARG_i@` placeholders, reporting every offender.
fn check_indices(template: &str, available: usize) -> Result<()> {
    let mut out_of_range = Vec::new();

    for caps in arg_pattern().captures_iter(template) {
        let whole = caps.get(0).expect("match").as_str();
        if available == 0 {
            return Err(AppError::UnmatchedPlaceholder(whole.to_string()).into());
        }
        let index = placeholder_index(&caps);
        if index < 1 || index > available {
            let text = whole.to_string();
            if !out_of_range.contains(&text) {
                out_of_range.push(text);
            }
        }
    }

    if !out_of_range.is_empty() {
        return Err(AppError::PlaceholderOutOfRange {
            placeholders: out_of_range.join(", "),
            available,
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_task_placeholder_substituted() {
        let argv = resolve(
            "cat @TASK@",
            Some(Path::new("/data/input.txt")),
            &[],
            4096,
        )
        .unwrap();
        assert_eq!(argv, vec!["cat", "/data/input.txt"]);
    }

    #[test]
    fn test_task_placeholder_dropped_without_file() {
        let argv = resolve("echo @TASK@ done", None, &[], 4096).unwrap();
        assert_eq!(argv, vec!["echo", "done"]);
    }

    #[test]
    fn test_bare_arg_is_first_field() {
        let argv = resolve("ping @ARG@", None, &args(&["host1"]), 4096).unwrap();
        assert_eq!(argv, vec!["ping", "host1"]);
    }

    #[test]
    fn test_indexed_placeholders() {
        let argv = resolve(
            "/bin/echo @ARG_1@ @ARG_2@ @ARG_3@",
            None,
            &args(&["a", "1", "prod"]),
            4096,
        )
        .unwrap();
        assert_eq!(argv, vec!["/bin/echo", "a", "1", "prod"]);
    }

    #[test]
    fn test_quoted_value_stays_one_token() {
        let argv = resolve(
            "sh -c '@ARG@'",
            None,
            &args(&["two words"]),
            4096,
        )
        .unwrap();
        assert_eq!(argv, vec!["sh", "-c", "two words"]);
    }

    #[test]
    fn test_unquoted_value_splits() {
        let argv = resolve("echo @ARG@", None, &args(&["two words"]), 4096).unwrap();
        assert_eq!(argv, vec!["echo", "two", "words"]);
    }

    #[test]
    fn test_out_of_range_reports_all_offenders() {
        let err = resolve(
            "cmd @ARG_1@ @ARG_5@ @ARG_9@",
            None,
            &args(&["only", "two"]),
            4096,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("placeholder index out of range"), "{msg}");
        assert!(msg.contains("@ARG_5@"), "{msg}");
        assert!(msg.contains("@ARG_9@"), "{msg}");
    }

    #[test]
    fn test_arg_zero_is_out_of_range() {
        let err = resolve("cmd @ARG_0@", None, &args(&["x"]), 4096).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_placeholder_without_arguments_fails() {
        let err = resolve("cmd @ARG@", None, &[], 4096).unwrap_err();
        assert!(err.to_string().contains("unmatched argument placeholder"));
    }

    #[test]
    fn test_malformed_placeholder_fails() {
        let err = resolve("cmd @ARG_x@", None, &args(&["v"]), 4096).unwrap_err();
        assert!(err.to_string().contains("unmatched argument placeholder"));
    }

    #[test]
    fn test_embedded_placeholder_in_token() {
        let argv = resolve(
            "curl http://@ARG_1@:@ARG_2@/health",
            None,
            &args(&["db1", "9000"]),
            4096,
        )
        .unwrap();
        assert_eq!(argv, vec!["curl", "http://db1:9000/health"]);
    }

    #[test]
    fn test_argument_length_limit() {
        let long = "x".repeat(100);
        let err = resolve("echo @ARG@", None, &args(&[&long]), 50).unwrap_err();
        assert!(err.to_string().contains("argument too long"));
    }

    #[test]
    fn test_unbalanced_quote_is_parse_error() {
        let err = resolve("echo 'unterminated", None, &[], 4096).unwrap_err();
        assert!(err.to_string().contains("invalid command template"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = resolve("@TASK@", None, &[], 4096).unwrap_err();
        assert!(err.to_string().contains("empty argv"));
    }

    #[test]
    fn test_task_path_used_verbatim() {
        let path = PathBuf::from("/a b/task.txt");
        // Unquoted @TASK@ with a space in the path splits; quoted keeps it.
        let argv = resolve("cat '@TASK@'", Some(&path), &[], 4096).unwrap();
        assert_eq!(argv, vec!["cat", "/a b/task.txt"]);
    }
}
