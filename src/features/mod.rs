//! Feature and label generation.
//!
//! - declarative column derivations (`rules`)
//! - threshold / k-means labeling (`labels`, `kmeans`)

pub mod kmeans;
pub mod labels;
pub mod rules;

pub use kmeans::{KMeansFit, KMeansParams, fit_kmeans};
pub use labels::{LabelOutcome, LabelingConfig, LabelingStrategy, generate_labels};
pub use rules::{DerivationRule, EPSILON, FeatureOutcome, FeatureRules, RuleCategory, generate_features};
