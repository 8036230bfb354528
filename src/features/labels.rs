//! Class label derivation.
//!
//! Two strategies, decoded once from the `labeling` config section:
//!
//! - `threshold`: `1` if a column exceeds a cutoff, else `0`
//! - `clustering` (alias `kmeans`): k-means cluster index over all numeric
//!   columns, after dropping rows with missing values
//!
//! Clustering shrinks the table. The number of removed rows is returned in
//! `LabelOutcome::dropped_rows` so callers do not have to infer it.

use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::StructuredTable;
use crate::error::AppError;
use crate::features::kmeans::{KMeansParams, fit_kmeans};

const DEFAULT_CUTOFF: f64 = 200.0;

/// Labeling method with its parameters. Decoded from the flat `labeling`
/// section (`method` plus the keys that method accepts).
#[derive(Debug, Clone, PartialEq)]
pub enum LabelingStrategy {
    Threshold {
        column: String,
        cutoff: f64,
    },
    Clustering {
        n_clusters: usize,
        n_init: usize,
        max_iter: usize,
        tol: f64,
        random_state: u64,
    },
}

impl LabelingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            LabelingStrategy::Threshold { .. } => "threshold",
            LabelingStrategy::Clustering { .. } => "clustering",
        }
    }
}

/// The `labeling` config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "LabelingDoc")]
pub struct LabelingConfig {
    pub strategy: LabelingStrategy,
    pub label_column: String,
    /// Columns removed after labeling (typically the threshold source, so the
    /// label cannot be read straight off a feature).
    pub drop_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Method {
    Threshold,
    #[serde(alias = "kmeans")]
    Clustering,
}

/// On-disk shape of the `labeling` section. Every key any method accepts is
/// listed here so unknown keys are rejected; keys that belong to the other
/// method are rejected in `try_from`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LabelingDoc {
    method: Method,
    column: Option<String>,
    threshold: Option<f64>,
    n_clusters: Option<usize>,
    n_init: Option<usize>,
    max_iter: Option<usize>,
    tol: Option<f64>,
    random_state: Option<u64>,
    #[serde(default = "default_label_column")]
    label_column: String,
    #[serde(default = "default_drop_columns")]
    drop_columns: Vec<String>,
}

impl TryFrom<LabelingDoc> for LabelingConfig {
    type Error = String;

    fn try_from(doc: LabelingDoc) -> Result<Self, Self::Error> {
        let threshold_keys = [("column", doc.column.is_some()), ("threshold", doc.threshold.is_some())];
        let clustering_keys = [
            ("n_clusters", doc.n_clusters.is_some()),
            ("n_init", doc.n_init.is_some()),
            ("max_iter", doc.max_iter.is_some()),
            ("tol", doc.tol.is_some()),
            ("random_state", doc.random_state.is_some()),
        ];
        let (method, foreign) = match doc.method {
            Method::Threshold => ("threshold", &clustering_keys[..]),
            Method::Clustering => ("clustering", &threshold_keys[..]),
        };
        if let Some((key, _)) = foreign.iter().find(|(_, set)| *set) {
            return Err(format!("`labeling.{key}` does not apply to method `{method}`"));
        }

        let strategy = match doc.method {
            Method::Threshold => LabelingStrategy::Threshold {
                column: doc.column.unwrap_or_else(default_threshold_column),
                cutoff: doc.threshold.unwrap_or(DEFAULT_CUTOFF),
            },
            Method::Clustering => {
                let d = KMeansParams::default();
                LabelingStrategy::Clustering {
                    n_clusters: doc.n_clusters.unwrap_or(d.n_clusters),
                    n_init: doc.n_init.unwrap_or(d.n_init),
                    max_iter: doc.max_iter.unwrap_or(d.max_iter),
                    tol: doc.tol.unwrap_or(d.tol),
                    random_state: doc.random_state.unwrap_or(d.random_state),
                }
            }
        };
        Ok(Self {
            strategy,
            label_column: doc.label_column,
            drop_columns: doc.drop_columns,
        })
    }
}

impl LabelingConfig {
    pub fn threshold(column: impl Into<String>, cutoff: f64) -> Self {
        Self {
            strategy: LabelingStrategy::Threshold {
                column: column.into(),
                cutoff,
            },
            label_column: default_label_column(),
            drop_columns: Vec::new(),
        }
    }

    pub fn clustering(n_clusters: usize) -> Self {
        let d = KMeansParams::default();
        Self {
            strategy: LabelingStrategy::Clustering {
                n_clusters,
                n_init: d.n_init,
                max_iter: d.max_iter,
                tol: d.tol,
                random_state: d.random_state,
            },
            label_column: default_label_column(),
            drop_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelOutcome {
    pub table: StructuredTable,
    /// Rows removed because a numeric feature was missing (clustering only).
    pub dropped_rows: usize,
}

/// Append the label column according to `config.strategy`.
pub fn generate_labels(table: &StructuredTable, config: &LabelingConfig) -> Result<LabelOutcome, AppError> {
    let outcome = match &config.strategy {
        LabelingStrategy::Threshold { column, cutoff } => {
            let values = table.numeric(column)?;
            // A missing value never exceeds the cutoff.
            let labels = values
                .iter()
                .map(|v| Some(if v.is_some_and(|x| x > *cutoff) { 1.0 } else { 0.0 }))
                .collect();
            let mut out = table.clone();
            out.set_numeric(&config.label_column, labels)?;
            LabelOutcome {
                table: out,
                dropped_rows: 0,
            }
        }
        LabelingStrategy::Clustering {
            n_clusters,
            n_init,
            max_iter,
            tol,
            random_state,
        } => {
            let params = KMeansParams {
                n_clusters: *n_clusters,
                n_init: *n_init,
                max_iter: *max_iter,
                tol: *tol,
                random_state: *random_state,
            };
            cluster_labels(table, &config.label_column, &params)?
        }
    };

    if outcome.dropped_rows > 0 {
        warn!(
            dropped = outcome.dropped_rows,
            remaining = outcome.table.n_rows(),
            "Rows with missing numeric values dropped before clustering"
        );
    }
    info!(method = config.strategy.name(), rows = outcome.table.n_rows(), "Labels generated");
    Ok(outcome)
}

fn cluster_labels(
    table: &StructuredTable,
    label_column: &str,
    params: &KMeansParams,
) -> Result<LabelOutcome, AppError> {
    let feature_names: Vec<&str> = table
        .numeric_column_names()
        .into_iter()
        .filter(|n| *n != label_column)
        .collect();
    let columns = feature_names
        .iter()
        .map(|n| table.numeric(n))
        .collect::<Result<Vec<_>, _>>()?;

    let mut kept = Vec::with_capacity(table.n_rows());
    let mut points = Vec::with_capacity(table.n_rows());
    for row in 0..table.n_rows() {
        let point: Option<Vec<f64>> = columns.iter().map(|c| c[row]).collect();
        if let Some(point) = point {
            kept.push(row);
            points.push(point);
        }
    }

    let fit = fit_kmeans(&points, params)?;

    let mut out = table.select_rows(&kept);
    out.set_numeric(label_column, fit.labels.iter().map(|&l| Some(l as f64)).collect())?;

    Ok(LabelOutcome {
        dropped_rows: table.n_rows() - kept.len(),
        table: out,
    })
}

fn default_threshold_column() -> String {
    "IR_mean".to_string()
}

fn default_label_column() -> String {
    "cloud_type".to_string()
}

fn default_drop_columns() -> Vec<String> {
    vec!["IR_mean".to_string()]
}
