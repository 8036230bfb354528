//! Pipeline configuration (YAML).
//!
//! The document is decoded once into typed sections. Rule maps, labeling
//! strategies and forest hyperparameters are validated at decode time, so a
//! bad config fails before any download starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::data::RetryPolicy;
use crate::error::AppError;
use crate::features::{FeatureRules, LabelingConfig};
use crate::io::AwsConfig;
use crate::model::ModelConfig;

pub mod ordered;

pub const DEFAULT_CONFIG_PATH: &str = "config/default-config.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub run_config: RunConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub generate_features: FeatureRules,
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub eda: EdaConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Prefix of the per-run artifact directory.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub raw_data: PathBuf,
    pub cleaned_data: PathBuf,
    pub features_data: PathBuf,
    pub model_output: PathBuf,
    pub metrics_output: PathBuf,
    pub chart_output: PathBuf,
    /// Parent of the per-run artifact directories.
    pub runs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_data: "data/raw/clouds.data".into(),
            cleaned_data: "data/processed/clouds_cleaned.csv".into(),
            features_data: "data/processed/clouds_features.csv".into(),
            model_output: "models/random_forest.json".into(),
            metrics_output: "artifacts/metrics.json".into(),
            chart_output: "artifacts/roc_curve.svg".into(),
            runs_dir: "runs".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceConfig {
    pub url: String,
    /// Column names for the raw file, in field order.
    pub columns: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    pub plot_roc: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdaConfig {
    pub enabled: bool,
    pub bins: usize,
}

impl Default for EdaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bins: 30,
        }
    }
}

impl PipelineConfig {
    /// Decode and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, AppError> {
        let config: PipelineConfig =
            serde_yaml::from_str(text).map_err(|e| AppError::config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-section checks that serde cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.run_config.name.trim().is_empty() {
            return Err(AppError::config("`run_config.name` must not be empty."));
        }
        if self.data_source.url.trim().is_empty() {
            return Err(AppError::config("`data_source.url` must not be empty."));
        }
        let columns = &self.data_source.columns;
        if columns.is_empty() {
            return Err(AppError::config("`data_source.columns` must list at least one column."));
        }
        if let Some(dup) = columns.iter().enumerate().find(|(i, c)| columns[..*i].contains(c)) {
            return Err(AppError::config(format!("Duplicate column `{}` in `data_source.columns`.", dup.1)));
        }
        self.generate_features.validate_against(columns)?;

        let label = &self.labeling.label_column;
        if self.model.target_column != *label {
            return Err(AppError::config(format!(
                "`model.target_column` ({}) must match `labeling.label_column` ({label}).",
                self.model.target_column
            )));
        }
        if self.labeling.drop_columns.contains(label) {
            return Err(AppError::config(format!("`labeling.drop_columns` must not drop the label column `{label}`.")));
        }

        let test_size = self.model.test_size;
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(AppError::config(format!("`model.test_size` must be in (0, 1), got {test_size}.")));
        }
        Ok(())
    }
}

/// A decoded config plus the exact text it came from (for run snapshots).
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub source: String,
    pub config: PipelineConfig,
}

pub fn load_config(path: &Path) -> Result<LoadedConfig, AppError> {
    let source = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("Failed to read config '{}': {e}", path.display())))?;
    let config = PipelineConfig::from_yaml(&source)
        .map_err(|e| AppError::config(format!("{} ({})", e.message(), path.display())))?;
    info!(path = %path.display(), run = %config.run_config.name, "Loaded config");
    Ok(LoadedConfig {
        path: path.to_path_buf(),
        source,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::features::{DerivationRule, LabelingStrategy};

    const MINIMAL: &str = r#"
run_config:
  name: clouds
data_source:
  url: https://example.org/cloud.data
  columns: [visible_entropy, visible_contrast, IR_min, IR_max, IR_mean]
generate_features:
  calculate_norm_range:
    IR_norm_range: {min_col: IR_min, max_col: IR_max, mean_col: IR_mean}
  log_transform:
    log_entropy: visible_entropy
  multiply:
    entropy_x_contrast: {col_a: visible_contrast, col_b: visible_entropy}
labeling:
  method: threshold
  threshold: 200
model:
  target_column: cloud_type
  test_size: 0.4
  params:
    n_estimators: 20
    max_depth: 8
"#;

    #[test]
    fn decodes_sections_with_defaults() {
        let cfg = PipelineConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.run_config.name, "clouds");
        assert_eq!(cfg.data_source.retry, RetryPolicy::default());
        assert_eq!(cfg.generate_features.rules().len(), 3);
        assert!(matches!(
            &cfg.generate_features.rules()[0],
            DerivationRule::NormalizedRange { output, .. } if output == "IR_norm_range"
        ));
        assert!(matches!(cfg.labeling.strategy, LabelingStrategy::Threshold { cutoff, .. } if cutoff == 200.0));
        assert_eq!(cfg.model.params.n_estimators, 20);
        assert_eq!(cfg.model.params.max_depth, Some(8));
        assert!(!cfg.evaluation.plot_roc);
        assert!(cfg.eda.enabled);
        assert!(!cfg.aws.upload);
        assert_eq!(cfg.paths.runs_dir, PathBuf::from("runs"));
    }

    #[test]
    fn rules_must_reference_known_columns() {
        let text = MINIMAL.replace("log_entropy: visible_entropy", "log_entropy: visible_entropy_typo");
        let err = PipelineConfig::from_yaml(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("visible_entropy_typo"));
    }

    #[test]
    fn unknown_keys_and_methods_are_config_errors() {
        let text = MINIMAL.replace("method: threshold", "method: dbscan");
        assert_eq!(PipelineConfig::from_yaml(&text).unwrap_err().kind(), ErrorKind::Config);

        let text = MINIMAL.replace("max_depth: 8", "max_depth: 8\n    learning_rate: 0.1");
        assert_eq!(PipelineConfig::from_yaml(&text).unwrap_err().kind(), ErrorKind::Config);

        let text = format!("{MINIMAL}\nextra_section: {{}}\n");
        assert_eq!(PipelineConfig::from_yaml(&text).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn misspelled_labeling_keys_are_config_errors() {
        let text = MINIMAL.replace("threshold: 200", "treshold: 100");
        let err = PipelineConfig::from_yaml(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("treshold"), "{}", err.message());

        let text = MINIMAL.replace("method: threshold\n  threshold: 200", "method: kmeans\n  n_cluster: 3");
        let err = PipelineConfig::from_yaml(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("n_cluster"), "{}", err.message());
    }

    #[test]
    fn test_size_is_range_checked() {
        let text = MINIMAL.replace("test_size: 0.4", "test_size: 1.2");
        assert_eq!(PipelineConfig::from_yaml(&text).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn target_must_be_the_label_column() {
        let text = MINIMAL.replace("target_column: cloud_type", "target_column: label");
        let err = PipelineConfig::from_yaml(&text).unwrap_err();
        assert!(err.message().contains("label_column"));
    }

    #[test]
    fn load_keeps_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.source, MINIMAL);
        assert_eq!(loaded.config.model.test_size, 0.4);

        let missing = load_config(&dir.path().join("nope.yaml")).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Config);
    }

    #[test]
    fn shipped_default_config_is_valid() {
        let text = include_str!("../../config/default-config.yaml");
        let cfg = PipelineConfig::from_yaml(text).unwrap();
        assert_eq!(cfg.data_source.columns.len(), 10);
    }
}
