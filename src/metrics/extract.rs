//! Trailer metric extraction
//!
//! Parses the master's final output lines into a [`MetricRow`]. Extraction is
//! positional: the last K non-empty lines are the trailer, and the first
//! decimal numeral (`digits.digits`) on each line is that field's value. Field
//! labels are never inspected.

use super::{MetricRow, TrailerLayout};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Why a trailer could not be turned into a row
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Output had fewer non-empty lines than the trailer needs
    #[error("expected {expected} trailer lines, found {found}")]
    MissingLines { expected: usize, found: usize },

    /// A trailer line carried no decimal numeral
    #[error("trailer line {line_index} ({field}) has no decimal value: {line:?}")]
    NoNumber {
        line_index: usize,
        field: &'static str,
        line: String,
    },
}

fn decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+\.\d+").expect("decimal pattern is valid"))
}

/// Extract one row from the master's full output
///
/// The row label is left empty; the caller names it after the trial.
///
/// # Errors
///
/// Fails without producing a partial row if fewer than
/// `layout.line_count()` non-empty lines exist or any trailer line has no
/// decimal numeral.
///
/// # Example
///
/// ```
/// use dllama_bench::metrics::{extract, TrailerLayout};
///
/// let output = "token 1\ntoken 2\n\
///               Avg Generation Time: 120.50 ms\n\
///               Avg Inference Time:  70.25 ms\n\
///               Avg Transfer Time:   50.25 ms\n";
/// let row = extract(output, TrailerLayout::Basic).unwrap();
/// assert_eq!(row.generation_time, 120.5);
/// assert_eq!(row.transfer_time, 50.25);
/// ```
pub fn extract(master_text: &str, layout: TrailerLayout) -> Result<MetricRow, ExtractionError> {
    let expected = layout.line_count();

    let lines: Vec<&str> = master_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.len() < expected {
        return Err(ExtractionError::MissingLines {
            expected,
            found: lines.len(),
        });
    }

    let trailer = &lines[lines.len() - expected..];
    let mut values = Vec::with_capacity(expected);

    for (i, (line, field)) in trailer.iter().zip(layout.fields()).enumerate() {
        let value = decimal_pattern()
            .find(line)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .ok_or_else(|| ExtractionError::NoNumber {
                line_index: i,
                field: field.name,
                line: line.to_string(),
            })?;
        values.push(value);
    }

    // values.len() is 3 or 5 by construction of the layouts
    MetricRow::from_values(String::new(), &values).ok_or(ExtractionError::MissingLines {
        expected,
        found: values.len(),
    })
}

/// Render a row in the master's trailer format (two decimals)
pub fn render_trailer(row: &MetricRow) -> String {
    row.layout()
        .fields()
        .iter()
        .zip(row.values())
        .map(|(field, value)| format!("{} {:.2} ms\n", field.master_label, value))
        .collect()
}
