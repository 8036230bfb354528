//! Held-out scoring.

use tracing::info;

use crate::domain::StructuredTable;
use crate::error::AppError;
use crate::model::{Classifier, FeatureMatrix, label_column};

/// One scored row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRecord {
    pub y_true: i64,
    pub y_pred: i64,
    pub y_proba: Option<f64>,
}

/// Column-oriented scores. Probabilities are present for every row or absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreSet {
    y_true: Vec<i64>,
    y_pred: Vec<i64>,
    y_proba: Option<Vec<f64>>,
}

impl ScoreSet {
    pub fn new(y_true: Vec<i64>, y_pred: Vec<i64>, y_proba: Option<Vec<f64>>) -> Result<Self, AppError> {
        let n = y_true.len();
        if y_pred.len() != n || y_proba.as_ref().is_some_and(|p| p.len() != n) {
            return Err(AppError::data(format!(
                "Score columns differ in length (y_true {n}, y_pred {}, y_proba {}).",
                y_pred.len(),
                y_proba.as_ref().map(Vec::len).unwrap_or(n)
            )));
        }
        Ok(Self { y_true, y_pred, y_proba })
    }

    pub fn len(&self) -> usize {
        self.y_true.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_true.is_empty()
    }

    pub fn y_true(&self) -> &[i64] {
        &self.y_true
    }

    pub fn y_pred(&self) -> &[i64] {
        &self.y_pred
    }

    pub fn y_proba(&self) -> Option<&[f64]> {
        self.y_proba.as_deref()
    }

    pub fn records(&self) -> impl Iterator<Item = ScoreRecord> + '_ {
        (0..self.len()).map(|i| ScoreRecord {
            y_true: self.y_true[i],
            y_pred: self.y_pred[i],
            y_proba: self.y_proba.as_ref().map(|p| p[i]),
        })
    }
}

/// Predict every row of `test` and pair predictions with the true labels.
///
/// Features are looked up by the model's own feature names, so extra columns
/// in `test` are ignored.
pub fn score_model(test: &StructuredTable, model: &dyn Classifier, target_column: &str) -> Result<ScoreSet, AppError> {
    if !test.has_column(target_column) {
        return Err(AppError::config(format!("Target column `{target_column}` not found.")));
    }
    if let Some(missing) = model.feature_names().iter().find(|n| !test.has_column(n)) {
        return Err(AppError::config(format!(
            "Model feature `{missing}` not found in scoring data."
        )));
    }

    let x = FeatureMatrix::from_table(test, model.feature_names())?;
    let y_true = label_column(test, target_column)?;
    let y_pred = model.predict(&x);
    let y_proba = model.predict_proba(&x);

    let scores = ScoreSet::new(y_true, y_pred, y_proba)?;
    info!(rows = scores.len(), with_proba = scores.y_proba().is_some(), "Model scored");
    Ok(scores)
}
