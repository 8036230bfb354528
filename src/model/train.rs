//! Train/test split and forest fitting.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::info;

use crate::domain::StructuredTable;
use crate::error::AppError;
use crate::model::forest::{ForestParams, RandomForest};
use crate::model::{FeatureMatrix, label_column};

/// The `model` config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default = "default_target")]
    pub target_column: String,
    /// Fraction of rows held out for scoring, in `(0, 1)`.
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default)]
    pub params: ForestParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            target_column: default_target(),
            test_size: default_test_size(),
            params: ForestParams::default(),
        }
    }
}

fn default_target() -> String {
    "cloud_type".to_string()
}

fn default_test_size() -> f64 {
    0.25
}

#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub model: RandomForest,
    /// Training rows, features and target.
    pub train: StructuredTable,
    /// Held-out rows, features and target.
    pub test: StructuredTable,
}

/// Shuffle `0..n` with a seeded RNG and cut it into `(train, test)`.
///
/// The test partition holds `ceil(test_size * n)` rows.
pub fn split_indices(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);

    let n_test = ((test_size * n as f64).ceil() as usize).min(n);
    let train = idx.split_off(n_test);
    (train, idx)
}

/// Split `table`, fit a random forest on the training rows.
///
/// Features are every column except `config.target_column`.
pub fn train_model(table: &StructuredTable, config: &ModelConfig) -> Result<TrainOutput, AppError> {
    let target = &config.target_column;
    if !table.has_column(target) {
        return Err(AppError::config(format!("Target column `{target}` not found.")));
    }
    if !(config.test_size > 0.0 && config.test_size < 1.0) {
        return Err(AppError::config(format!(
            "`test_size` must be in (0, 1), got {}.",
            config.test_size
        )));
    }

    let (train_idx, test_idx) = split_indices(table.n_rows(), config.test_size, config.params.random_state);
    if train_idx.is_empty() || test_idx.is_empty() {
        return Err(AppError::data(format!(
            "Split of {} rows at test_size {} leaves an empty partition.",
            table.n_rows(),
            config.test_size
        )));
    }

    let train = table.select_rows(&train_idx);
    let test = table.select_rows(&test_idx);

    let features: Vec<String> = table
        .column_names()
        .into_iter()
        .filter(|n| *n != target)
        .map(str::to_string)
        .collect();
    if features.is_empty() {
        return Err(AppError::data("No feature columns besides the target."));
    }

    let x = FeatureMatrix::from_table(&train, &features)?;
    let y = label_column(&train, target)?;
    let model = RandomForest::fit(&x, &y, &config.params)?;

    info!(
        train_rows = train.n_rows(),
        test_rows = test.n_rows(),
        features = features.len(),
        trees = model.n_trees(),
        "Model trained"
    );

    Ok(TrainOutput { model, train, test })
}
