//! Arguments-file parsing: comment handling, separator splitting, and
//! column-count consistency.

use std::path::Path;

use anyhow::{Context, Result, bail};

use parx_core::{AppError, Separator};

/// Parsed arguments file: one row of fields per kept line.
#[derive(Clone, Debug)]
pub struct ArgumentRows {
    pub rows: Vec<Vec<String>>,
    /// Field count shared by every row.
    pub field_count: usize,
}

/// Read and split an arguments file.
///
/// Blank lines and lines whose first non-whitespace character is `#` are
/// dropped. Every kept line must produce the same number of fields; with no
/// separator, each line is a single field.
pub fn parse_arguments_file(path: &Path, separator: Option<Separator>) -> Result<ArgumentRows> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read arguments file: {}", path.display()))?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut expected: Option<(usize, usize)> = None; // (field count, first line no)

    for (line_index, raw_line) in contents.lines().enumerate() {
        let line_number = line_index + 1;
        let line = raw_line.trim_end_matches('\r');

        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let fields = match separator {
            Some(sep) => sep.split(line),
            None => vec![line.to_string()],
        };

        match expected {
            None => expected = Some((fields.len(), line_number)),
            Some((count, _)) if count != fields.len() => {
                return Err(AppError::InconsistentArgumentCounts {
                    line: line_number,
                    found: fields.len(),
                    expected: count,
                }
                .into());
            }
            Some(_) => {}
        }

        rows.push(fields);
    }

    let Some((field_count, _)) = expected else {
        bail!(
            "arguments file contains no usable lines: {}",
            path.display()
        );
    };

    Ok(ArgumentRows { rows, field_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_single_column_no_separator() {
        let file = args_file("alpha\nbeta\ngamma\n");
        let rows = parse_arguments_file(file.path(), None).unwrap();
        assert_eq!(rows.field_count, 1);
        assert_eq!(
            rows.rows,
            vec![vec!["alpha"], vec!["beta"], vec!["gamma"]]
        );
    }

    #[test]
    fn test_comments_and_blanks_dropped() {
        let file = args_file("# header\n\nalpha\n   # indented comment\nbeta\n\n");
        let rows = parse_arguments_file(file.path(), None).unwrap();
        assert_eq!(rows.rows.len(), 2);
    }

    #[test]
    fn test_comma_separated_columns() {
        let file = args_file("a,1,prod\nb,2,dev\n");
        let rows = parse_arguments_file(file.path(), Some(Separator::Comma)).unwrap();
        assert_eq!(rows.field_count, 3);
        assert_eq!(rows.rows[0], vec!["a", "1", "prod"]);
        assert_eq!(rows.rows[1], vec!["b", "2", "dev"]);
    }

    #[test]
    fn test_inconsistent_counts_rejected() {
        let file = args_file("a,1\nb,2,3\n");
        let err = parse_arguments_file(file.path(), Some(Separator::Comma)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("inconsistent argument counts"), "{msg}");
        assert!(msg.contains("line 2"), "{msg}");
    }

    #[test]
    fn test_inconsistent_count_reports_expected() {
        let file = args_file("a,b,c\nx,y\n");
        let msg = parse_arguments_file(file.path(), Some(Separator::Comma))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("has 2 fields, expected 3"), "{msg}");
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = args_file("# only comments\n\n");
        let err = parse_arguments_file(file.path(), None).unwrap_err();
        assert!(err.to_string().contains("no usable lines"));
    }

    #[test]
    fn test_crlf_line_endings() {
        let file = args_file("a,1\r\nb,2\r\n");
        let rows = parse_arguments_file(file.path(), Some(Separator::Comma)).unwrap();
        assert_eq!(rows.rows[1], vec!["b", "2"]);
    }

    #[test]
    fn test_whitespace_separator() {
        let file = args_file("host1 \t 8080\nhost2  9090\n");
        let rows = parse_arguments_file(file.path(), Some(Separator::Whitespace)).unwrap();
        assert_eq!(rows.field_count, 2);
        assert_eq!(rows.rows[0], vec!["host1", "8080"]);
    }

    #[test]
    fn test_missing_file() {
        let err = parse_arguments_file(Path::new("/nonexistent/args.txt"), None).unwrap_err();
        assert!(err.to_string().contains("Failed to read arguments file"));
    }
}
