//! CSV read/write for datasets and score sets.
//!
//! Datasets are written with a header row and no index column. Missing
//! numeric values are empty fields. On read, a column whose non-empty fields
//! all parse as numbers becomes numeric; anything else stays text.

use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::info;

use crate::domain::{Column, StructuredTable, parse_numeric};
use crate::error::AppError;
use crate::io::artifacts::ensure_parent;
use crate::model::ScoreSet;

/// Write `table` as CSV, creating parent directories and overwriting.
pub fn write_table_csv(path: &Path, table: &StructuredTable) -> Result<(), AppError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to create CSV '{}': {e}", path.display())))?;

    writer
        .write_record(table.column_names())
        .map_err(|e| AppError::io(format!("Failed to write CSV header: {e}")))?;
    for row in 0..table.n_rows() {
        let record: Vec<String> = table.columns().iter().map(|c| c.cell_text(row)).collect();
        writer
            .write_record(&record)
            .map_err(|e| AppError::io(format!("Failed to write CSV row {row}: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::io(format!("Failed to flush CSV '{}': {e}", path.display())))?;

    info!(path = %path.display(), rows = table.n_rows(), cols = table.n_cols(), "Dataset saved");
    Ok(())
}

/// Read a CSV with a header row into a table.
pub fn read_table_csv(path: &Path) -> Result<StructuredTable, AppError> {
    let (headers, records) = read_records(path)?;

    let mut cells: Vec<Vec<String>> = vec![Vec::with_capacity(records.len()); headers.len()];
    for (idx, record) in records.iter().enumerate() {
        if record.len() != headers.len() {
            return Err(AppError::format(format!(
                "Line {}: expected {} fields, found {}.",
                idx + 2,
                headers.len(),
                record.len()
            )));
        }
        for (col, field) in cells.iter_mut().zip(record.iter()) {
            col.push(field.to_string());
        }
    }

    let columns = headers
        .iter()
        .zip(cells)
        .map(|(name, values)| {
            let numeric = values.iter().all(|v| v.is_empty() || parse_numeric(v).is_some());
            if numeric {
                Column::numeric(name, values.iter().map(|v| parse_numeric(v)).collect())
            } else {
                Column::text(name, values)
            }
        })
        .collect();

    StructuredTable::from_columns(columns)
}

/// Write scores with header `y_true,y_pred[,y_proba]`.
pub fn write_scores_csv(path: &Path, scores: &ScoreSet) -> Result<(), AppError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to create scores CSV '{}': {e}", path.display())))?;

    let mut header = vec!["y_true", "y_pred"];
    if scores.y_proba().is_some() {
        header.push("y_proba");
    }
    writer
        .write_record(&header)
        .map_err(|e| AppError::io(format!("Failed to write scores header: {e}")))?;

    for r in scores.records() {
        let mut record = vec![r.y_true.to_string(), r.y_pred.to_string()];
        if let Some(p) = r.y_proba {
            record.push(p.to_string());
        }
        writer
            .write_record(&record)
            .map_err(|e| AppError::io(format!("Failed to write scores row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::io(format!("Failed to flush scores CSV: {e}")))?;

    info!(path = %path.display(), rows = scores.len(), "Scores saved");
    Ok(())
}

/// Read a scores CSV. `y_proba` is optional but, if present, must be filled
/// on every row.
pub fn read_scores_csv(path: &Path) -> Result<ScoreSet, AppError> {
    let (headers, records) = read_records(path)?;
    let find = |name: &str| headers.iter().position(|h| h == name);

    let t_idx = find("y_true").ok_or_else(|| AppError::format("Scores CSV has no `y_true` column."))?;
    let p_idx = find("y_pred").ok_or_else(|| AppError::format("Scores CSV has no `y_pred` column."))?;
    let proba_idx = find("y_proba");

    let mut y_true = Vec::with_capacity(records.len());
    let mut y_pred = Vec::with_capacity(records.len());
    let mut y_proba = proba_idx.map(|_| Vec::with_capacity(records.len()));

    for (idx, record) in records.iter().enumerate() {
        let line = idx + 2;
        y_true.push(parse_label(record.get(t_idx), "y_true", line)?);
        y_pred.push(parse_label(record.get(p_idx), "y_pred", line)?);
        if let (Some(i), Some(out)) = (proba_idx, y_proba.as_mut()) {
            let p = record
                .get(i)
                .and_then(parse_numeric)
                .ok_or_else(|| AppError::format(format!("Line {line}: `y_proba` is missing or not a number.")))?;
            out.push(p);
        }
    }

    ScoreSet::new(y_true, y_pred, y_proba)
}

fn read_records(path: &Path) -> Result<(StringRecord, Vec<StringRecord>), AppError> {
    let file = File::open(path).map_err(|e| AppError::io(format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::format(format!("Failed to read CSV headers: {e}")))?
        .clone();

    let records = reader
        .records()
        .enumerate()
        .map(|(idx, r)| r.map_err(|e| AppError::format(format!("Line {}: CSV parse error: {e}", idx + 2))))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((headers, records))
}

fn parse_label(field: Option<&str>, column: &str, line: usize) -> Result<i64, AppError> {
    match field.and_then(parse_numeric) {
        Some(v) if v.fract() == 0.0 && v.is_finite() => Ok(v as i64),
        _ => Err(AppError::format(format!(
            "Line {line}: `{column}` is not an integer label."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_round_trip_keeps_missing_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/features.csv");
        let table = StructuredTable::from_columns(vec![
            Column::numeric("IR_norm_range", vec![Some(2.0), None, Some(0.5)]),
            Column::text("station", vec!["a".into(), "b".into(), "c".into()]),
        ])
        .unwrap();

        write_table_csv(&path, &table).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "IR_norm_range,station\n2,a\n,b\n0.5,c\n");

        let back = read_table_csv(&path).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn scores_header_omits_absent_probabilities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");

        let scores = ScoreSet::new(vec![0, 1], vec![1, 1], None).unwrap();
        write_scores_csv(&path, &scores).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "y_true,y_pred\n0,1\n1,1\n");
        assert_eq!(read_scores_csv(&path).unwrap(), scores);

        let scores = ScoreSet::new(vec![0, 1], vec![1, 1], Some(vec![0.25, 0.75])).unwrap();
        write_scores_csv(&path, &scores).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("y_true,y_pred,y_proba\n"));
        assert_eq!(read_scores_csv(&path).unwrap(), scores);
    }

    #[test]
    fn scores_require_label_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        std::fs::write(&path, "y_pred\n1\n").unwrap();
        assert_eq!(read_scores_csv(&path).unwrap_err().kind(), crate::error::ErrorKind::Format);
    }
}
