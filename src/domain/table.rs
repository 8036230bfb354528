//! In-memory structured table.
//!
//! A `StructuredTable` is an ordered list of uniquely named columns that all
//! have the same number of rows. Cells are either:
//!
//! - numeric (`Option<f64>`, where `None` is an explicit missing value), or
//! - raw text tokens that have not been coerced yet.
//!
//! Stages never mutate a caller's table: every transformation returns a new
//! table (the struct is `Clone`, and all mutating helpers are used on a copy).

use std::collections::HashSet;

use crate::error::AppError;

/// Column payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => ColumnData::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    /// Convenience constructor for fully populated numeric columns.
    pub fn from_f64(name: impl Into<String>, values: &[f64]) -> Self {
        Self::numeric(name, values.iter().map(|&v| Some(v)).collect())
    }

    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data, ColumnData::Numeric(_))
    }

    /// Render one cell as it should appear in a CSV file.
    ///
    /// Missing numeric values render as an empty field.
    pub fn cell_text(&self, row: usize) -> String {
        match &self.data {
            ColumnData::Numeric(v) => v[row].map(|x| x.to_string()).unwrap_or_default(),
            ColumnData::Text(v) => v[row].clone(),
        }
    }
}

/// Per-column outcome of numeric coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoercionReport {
    /// `(column, cells that failed to parse and became missing)`, only for
    /// columns where at least one cell was lost.
    pub coerced_missing: Vec<(String, usize)>,
}

impl CoercionReport {
    pub fn total(&self) -> usize {
        self.coerced_missing.iter().map(|(_, n)| n).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredTable {
    columns: Vec<Column>,
    n_rows: usize,
}

impl StructuredTable {
    /// Build a table, validating unique names and equal column lengths.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.name.as_str()) {
                return Err(AppError::config(format!("Duplicate column name `{}`.", c.name)));
            }
        }

        let n_rows = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != n_rows) {
            return Err(AppError::data(format!(
                "Column `{}` has {} rows, expected {n_rows}.",
                bad.name,
                bad.len()
            )));
        }

        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`, the way shapes are reported in logs.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.columns.len())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Numeric values of a column.
    ///
    /// Absent columns are a configuration problem (`ConfigError`); a text
    /// column means coercion was skipped (`DataError`).
    pub fn numeric(&self, name: &str) -> Result<&[Option<f64>], AppError> {
        let col = self
            .column(name)
            .ok_or_else(|| AppError::config(format!("Missing column `{name}` in table.")))?;
        match &col.data {
            ColumnData::Numeric(v) => Ok(v),
            ColumnData::Text(_) => Err(AppError::data(format!(
                "Column `{name}` is not numeric (coerce the table first)."
            ))),
        }
    }

    /// Set a numeric column, replacing an existing column of the same name in
    /// place or appending a new one.
    pub fn set_numeric(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<(), AppError> {
        if !self.columns.is_empty() && values.len() != self.n_rows {
            return Err(AppError::data(format!(
                "Column `{name}` has {} rows, expected {}.",
                values.len(),
                self.n_rows
            )));
        }
        if self.columns.is_empty() {
            self.n_rows = values.len();
        }

        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => col.data = ColumnData::Numeric(values),
            None => self.columns.push(Column::numeric(name, values)),
        }
        Ok(())
    }

    /// Copy of the table without the named columns. Unknown names are ignored.
    pub fn without_columns(&self, names: &[String]) -> Self {
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n == &c.name))
            .cloned()
            .collect::<Vec<_>>();
        let n_rows = if columns.is_empty() { 0 } else { self.n_rows };
        Self { columns, n_rows }
    }

    /// Copy of the table restricted to `rows`, in the given order.
    ///
    /// # Panics
    /// Panics if a row index is out of bounds. Callers derive indices from the
    /// table itself.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.select(rows),
                })
                .collect(),
            n_rows: rows.len(),
        }
    }

    /// Coerce every column to numeric.
    ///
    /// This is the single place where missing values are introduced: a text
    /// token that does not parse as a finite-or-infinite `f64` (including the
    /// empty token) becomes `None`. Numeric columns pass through unchanged.
    /// Downstream arithmetic propagates `None` instead of failing.
    pub fn coerce_numeric(&self) -> (Self, CoercionReport) {
        let mut report = CoercionReport::default();
        let columns = self
            .columns
            .iter()
            .map(|c| match &c.data {
                ColumnData::Numeric(_) => c.clone(),
                ColumnData::Text(tokens) => {
                    let values: Vec<Option<f64>> = tokens.iter().map(|t| parse_numeric(t)).collect();
                    let lost = tokens
                        .iter()
                        .zip(&values)
                        .filter(|(t, v)| v.is_none() && !t.trim().is_empty())
                        .count();
                    if lost > 0 {
                        report.coerced_missing.push((c.name.clone(), lost));
                    }
                    Column::numeric(c.name.clone(), values)
                }
            })
            .collect();

        (
            Self {
                columns,
                n_rows: self.n_rows,
            },
            report,
        )
    }

    /// Names of all numeric columns, in table order.
    pub fn numeric_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_numeric())
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Parse a single token, treating NaN spellings and unparsable text as missing.
pub fn parse_numeric(token: &str) -> Option<f64> {
    let v = token.trim().parse::<f64>().ok()?;
    if v.is_nan() { None } else { Some(v) }
}
