//! Small shared utilities for CLI commands: a progress bar builder, output
//! formatting for `list`/`search`, and the import mapping parser.

use std::collections::HashMap;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::error::{PipelineError, Result};

pub fn progress_bar(len: u64, message: &str) -> ProgressBar {
    let bar = if len > 0 {
        ProgressBar::new(len)
    } else {
        ProgressBar::new_spinner()
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    bar.set_message(message.to_string());
    bar
}

pub fn note(message: &str) {
    println!("{}", console::style(message).dim());
}

pub fn warn(message: &str) {
    eprintln!("{}", console::style(format!("warning: {message}")).yellow());
}

/// Parse a `--mapping` JSON object of `target_field -> source_column`.
pub fn parse_mapping(raw: &str) -> Result<HashMap<String, String>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PipelineError::Validation(format!("invalid --mapping JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| PipelineError::Validation("--mapping must be a JSON object".into()))?;
    let mut mapping = HashMap::with_capacity(object.len());
    for (key, val) in object {
        let val = val
            .as_str()
            .ok_or_else(|| PipelineError::Validation(format!("--mapping value for {key} must be a string")))?;
        mapping.insert(key.clone(), val.to_string());
    }
    Ok(mapping)
}

/// Render rows as a fixed-width table, matching the column order given.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_line.join("  "));
    println!("{}", "-".repeat(header_line.iter().map(|s| s.len()).sum::<usize>() + 2 * (headers.len() - 1)));
    for row in rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
            .collect();
        println!("{}", line.join("  "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_string_mapping() {
        let mapping = parse_mapping(r#"{"title":"col_title","body":"col_body"}"#).unwrap();
        assert_eq!(mapping.get("title"), Some(&"col_title".to_string()));
    }

    #[test]
    fn rejects_non_object_mapping() {
        assert!(parse_mapping("[1,2,3]").is_err());
    }

    #[test]
    fn rejects_non_string_mapping_value() {
        assert!(parse_mapping(r#"{"title": 5}"#).is_err());
    }
}
