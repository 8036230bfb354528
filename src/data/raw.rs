//! Whitespace-delimited raw file parsing.
//!
//! Raw instrument dumps start with an arbitrary amount of free-form metadata
//! before the numeric records begin. We locate the first line that "looks
//! like data" (exactly N numeric tokens) and parse everything from there on.
//!
//! A metadata line that happens to consist of exactly N numeric-looking tokens
//! is indistinguishable from data and will be taken as the start. That is a
//! known limitation of the format, not something we try to guess around.

use tracing::{debug, info};

use crate::domain::{Column, StructuredTable, parse_numeric};
use crate::error::AppError;

/// Parsed raw dataset plus where the data started.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub table: StructuredTable,
    /// 0-based index of the first data line.
    pub header_offset: usize,
}

/// Find the 0-based index of the first line with exactly `expected_fields`
/// numeric tokens.
pub fn detect_data_start(text: &str, expected_fields: usize) -> Result<usize, AppError> {
    for (idx, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() == expected_fields && tokens.iter().all(|t| is_signed_decimal(t)) {
            info!(line = idx, "Detected start of data");
            return Ok(idx);
        }
    }

    Err(AppError::format(format!(
        "No valid data line found with {expected_fields} numeric fields."
    )))
}

/// Parse the raw text into a table with the given column names.
///
/// Columns whose tokens all parse as numbers come back numeric; a column with
/// any stray token stays as text so the caller decides how to coerce it.
pub fn parse_raw_table(text: &str, columns: &[String]) -> Result<RawTable, AppError> {
    if columns.is_empty() {
        return Err(AppError::config("`data_source.columns` must list at least one column."));
    }

    let n = columns.len();
    let header_offset = detect_data_start(text, n)?;

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); n];
    for (idx, line) in text.lines().enumerate().skip(header_offset) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() > n {
            return Err(AppError::format(format!(
                "Line {}: expected {n} fields, saw {}.",
                idx + 1,
                tokens.len()
            )));
        }
        if tokens.len() < n {
            debug!(line = idx + 1, fields = tokens.len(), "Short row padded with missing values");
        }
        for (col, slot) in cells.iter_mut().enumerate() {
            slot.push(tokens.get(col).map(|t| t.to_string()).unwrap_or_default());
        }
    }

    let table_columns = columns
        .iter()
        .zip(cells)
        .map(|(name, tokens)| {
            let parsed: Option<Vec<Option<f64>>> = tokens
                .iter()
                .map(|t| if t.is_empty() { Some(None) } else { parse_numeric(t).map(Some) })
                .collect();
            match parsed {
                Some(values) => Column::numeric(name.clone(), values),
                None => Column::text(name.clone(), tokens),
            }
        })
        .collect();

    let table = StructuredTable::from_columns(table_columns)?;
    info!(rows = table.n_rows(), cols = table.n_cols(), "Dataset created");

    Ok(RawTable { table, header_offset })
}

/// `-?` digits with at most one `.`, and at least one digit overall.
fn is_signed_decimal(token: &str) -> bool {
    let body = token.strip_prefix('-').unwrap_or(token);
    let mut dots = 0;
    let mut digits = 0;
    for ch in body.chars() {
        match ch {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}
