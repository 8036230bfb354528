//! Random forest classifier.
//!
//! Trees are grown on bootstrap samples with per-node feature sub-sampling.
//! Every tree gets its own `StdRng`, seeded from the master RNG before any
//! tree is built, so the fitted forest is identical for every `n_jobs`.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::model::tree::{Criterion, DecisionTree, TreeParams};
use crate::model::{Classifier, FeatureMatrix};

/// Forest hyperparameters (the `model.params` config section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub criterion: Criterion,
    pub bootstrap: bool,
    pub random_state: u64,
    /// Worker threads for tree building; `0` or negative uses all cores.
    pub n_jobs: i32,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            criterion: Criterion::Gini,
            bootstrap: true,
            random_state: 42,
            n_jobs: 1,
        }
    }
}

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MaxFeaturesDoc", into = "MaxFeaturesDoc")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
    Count(usize),
    /// Fraction of the feature count, in `(0, 1]`.
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt() as usize,
            MaxFeatures::Log2 => n.log2().max(0.0) as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(c) => c,
            MaxFeatures::Fraction(f) => (f * n) as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MaxFeaturesDoc {
    Name(String),
    Count(u64),
    Fraction(f64),
}

impl TryFrom<MaxFeaturesDoc> for MaxFeatures {
    type Error = String;

    fn try_from(doc: MaxFeaturesDoc) -> Result<Self, Self::Error> {
        match doc {
            MaxFeaturesDoc::Name(name) => match name.as_str() {
                "sqrt" | "auto" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                "all" | "none" => Ok(MaxFeatures::All),
                other => Err(format!("unknown max_features `{other}` (expected sqrt, log2, all, a count or a fraction)")),
            },
            MaxFeaturesDoc::Count(0) => Err("max_features must be at least 1".to_string()),
            MaxFeaturesDoc::Count(c) => Ok(MaxFeatures::Count(c as usize)),
            MaxFeaturesDoc::Fraction(f) if f > 0.0 && f <= 1.0 => Ok(MaxFeatures::Fraction(f)),
            MaxFeaturesDoc::Fraction(f) => Err(format!("max_features fraction must be in (0, 1], got {f}")),
        }
    }
}

impl From<MaxFeatures> for MaxFeaturesDoc {
    fn from(m: MaxFeatures) -> Self {
        match m {
            MaxFeatures::Sqrt => MaxFeaturesDoc::Name("sqrt".into()),
            MaxFeatures::Log2 => MaxFeaturesDoc::Name("log2".into()),
            MaxFeatures::All => MaxFeaturesDoc::Name("all".into()),
            MaxFeatures::Count(c) => MaxFeaturesDoc::Count(c as u64),
            MaxFeatures::Fraction(f) => MaxFeaturesDoc::Fraction(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    feature_names: Vec<String>,
    /// Sorted distinct training labels; leaf probabilities follow this order.
    classes: Vec<i64>,
    params: ForestParams,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(x: &FeatureMatrix, y: &[i64], params: &ForestParams) -> Result<Self, AppError> {
        if params.n_estimators == 0 {
            return Err(AppError::config("`n_estimators` must be at least 1."));
        }
        if x.n_rows() == 0 {
            return Err(AppError::data("Cannot fit a forest on zero rows."));
        }
        if x.n_rows() != y.len() {
            return Err(AppError::data(format!(
                "Feature rows ({}) and labels ({}) differ in length.",
                x.n_rows(),
                y.len()
            )));
        }

        let mut classes = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        let y_idx: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or(0))
            .collect();

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: params.max_features.resolve(x.n_features()),
            criterion: params.criterion,
        };

        let mut master = StdRng::seed_from_u64(params.random_state);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.next_u64()).collect();

        let n = x.n_rows();
        let grow = |seed: &u64| {
            let mut rng = StdRng::seed_from_u64(*seed);
            let samples: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            DecisionTree::fit(x.rows(), &y_idx, classes.len(), samples, &tree_params, &mut rng)
        };

        let trees: Vec<DecisionTree> = if params.n_jobs == 1 {
            seeds.iter().map(grow).collect()
        } else {
            let threads = if params.n_jobs > 1 { params.n_jobs as usize } else { 0 };
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| AppError::config(format!("Failed to start {threads} worker threads: {e}")))?;
            pool.install(|| seeds.par_iter().map(grow).collect())
        };

        debug!(
            trees = trees.len(),
            classes = classes.len(),
            max_features = tree_params.max_features,
            "Forest grown"
        );

        Ok(Self {
            feature_names: x.names().to_vec(),
            classes,
            params: params.clone(),
            trees,
        })
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean leaf distribution over all trees, one row per sample.
    pub fn class_proba(&self, x: &FeatureMatrix) -> Vec<Vec<f64>> {
        let k = self.classes.len();
        let scale = 1.0 / self.trees.len().max(1) as f64;
        x.rows()
            .iter()
            .map(|row| {
                let mut acc = vec![0.0; k];
                for tree in &self.trees {
                    for (a, p) in acc.iter_mut().zip(tree.proba(row)) {
                        *a += p;
                    }
                }
                acc.iter_mut().for_each(|a| *a *= scale);
                acc
            })
            .collect()
    }
}

impl Classifier for RandomForest {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, x: &FeatureMatrix) -> Vec<i64> {
        self.class_proba(x)
            .iter()
            .map(|p| {
                // Ties go to the lowest class.
                let mut best = 0;
                for (j, v) in p.iter().enumerate() {
                    if *v > p[best] {
                        best = j;
                    }
                }
                self.classes.get(best).copied().unwrap_or_default()
            })
            .collect()
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Option<Vec<f64>> {
        let positive = self.classes.iter().position(|c| *c == 1);
        Some(
            self.class_proba(x)
                .iter()
                .map(|p| positive.map(|j| p[j]).unwrap_or(0.0))
                .collect(),
        )
    }
}
