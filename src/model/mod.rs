//! Classification models.
//!
//! - CART decision tree (`tree`)
//! - bagged random forest (`forest`)
//! - train/test split + fitting (`train`)
//! - held-out scoring (`score`)
//!
//! Scoring and evaluation only see the `Classifier` trait, so a model without
//! probability output (or a test stub) plugs in the same way.

use serde::{Deserialize, Serialize};

use crate::domain::StructuredTable;
use crate::error::AppError;

pub mod forest;
pub mod score;
pub mod train;
pub mod tree;

pub use forest::{ForestParams, MaxFeatures, RandomForest};
pub use score::{ScoreRecord, ScoreSet, score_model};
pub use train::{ModelConfig, TrainOutput, split_indices, train_model};
pub use tree::{Criterion, DecisionTree};

/// A fitted classifier over named numeric features.
pub trait Classifier {
    /// Feature columns, in the order the model expects them.
    fn feature_names(&self) -> &[String];

    fn predict(&self, x: &FeatureMatrix) -> Vec<i64>;

    /// Probability of the positive class (label `1`) per row, if the model
    /// produces probabilities at all.
    fn predict_proba(&self, x: &FeatureMatrix) -> Option<Vec<f64>>;
}

/// Dense row-major feature matrix with no missing cells.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Extract `names` from `table`. Every cell must be present and finite.
    pub fn from_table(table: &StructuredTable, names: &[String]) -> Result<Self, AppError> {
        let columns = names
            .iter()
            .map(|n| table.numeric(n))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(table.n_rows());
        for row in 0..table.n_rows() {
            let mut values = Vec::with_capacity(names.len());
            for (name, col) in names.iter().zip(&columns) {
                match col[row] {
                    Some(v) if v.is_finite() => values.push(v),
                    _ => {
                        return Err(AppError::data(format!(
                            "Feature `{name}` has a missing or non-finite value at row {row}."
                        )));
                    }
                }
            }
            rows.push(values);
        }

        Ok(Self {
            names: names.to_vec(),
            rows,
        })
    }

    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { names, rows }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.names.len()
    }
}

/// Read an integer class label column.
pub fn label_column(table: &StructuredTable, name: &str) -> Result<Vec<i64>, AppError> {
    table
        .numeric(name)?
        .iter()
        .enumerate()
        .map(|(row, v)| match v {
            Some(x) if x.is_finite() && x.fract() == 0.0 => Ok(*x as i64),
            Some(x) => Err(AppError::data(format!(
                "Label `{name}` is not an integer class at row {row}: {x}."
            ))),
            None => Err(AppError::data(format!("Label `{name}` is missing at row {row}."))),
        })
        .collect()
}

/// Serialized model file. The `kind` tag selects the model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    RandomForest(RandomForest),
}

impl ModelArtifact {
    /// One-line description for terminal output.
    pub fn describe(&self) -> String {
        match self {
            ModelArtifact::RandomForest(m) => format!(
                "random forest: {} trees, classes {:?}, max_features={:?}, criterion={:?}",
                m.n_trees(),
                m.classes(),
                m.params().max_features,
                m.params().criterion,
            ),
        }
    }
}

impl Classifier for ModelArtifact {
    fn feature_names(&self) -> &[String] {
        match self {
            ModelArtifact::RandomForest(m) => m.feature_names(),
        }
    }

    fn predict(&self, x: &FeatureMatrix) -> Vec<i64> {
        match self {
            ModelArtifact::RandomForest(m) => m.predict(x),
        }
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Option<Vec<f64>> {
        match self {
            ModelArtifact::RandomForest(m) => m.predict_proba(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;
    use crate::error::ErrorKind;

    #[test]
    fn matrix_rejects_missing_cells() {
        let table = StructuredTable::from_columns(vec![Column::numeric("a", vec![Some(1.0), None])]).unwrap();
        let err = FeatureMatrix::from_table(&table, &["a".to_string()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn matrix_keeps_requested_order() {
        let table = StructuredTable::from_columns(vec![
            Column::from_f64("a", &[1.0, 2.0]),
            Column::from_f64("b", &[3.0, 4.0]),
        ])
        .unwrap();
        let m = FeatureMatrix::from_table(&table, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(m.rows(), &[vec![3.0, 1.0], vec![4.0, 2.0]]);
    }

    #[test]
    fn labels_must_be_integral() {
        let table = StructuredTable::from_columns(vec![Column::from_f64("y", &[0.0, 1.5])]).unwrap();
        assert_eq!(label_column(&table, "y").unwrap_err().kind(), ErrorKind::Data);

        let table = StructuredTable::from_columns(vec![Column::from_f64("y", &[0.0, 2.0])]).unwrap();
        assert_eq!(label_column(&table, "y").unwrap(), vec![0, 2]);
    }
}
