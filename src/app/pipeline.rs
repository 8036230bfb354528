//! The batch pipeline behind `clouds run`.
//!
//! acquire -> create_dataset -> features -> labels -> eda -> train -> score ->
//! evaluate -> upload
//!
//! Stages run in order and fail fast; every error leaving a stage is tagged
//! with that stage. EDA figures and the ROC plot are side outputs: their
//! failures are logged and the run continues.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn};

use crate::config::LoadedConfig;
use crate::data::{fetch, parse_raw_table};
use crate::domain::CoercionReport;
use crate::error::{AppError, Stage};
use crate::features::{generate_features, generate_labels};
use crate::io::{
    AwsConfig, RunDir, object_key, upload_artifacts, write_bytes, write_json, write_model, write_scores_csv,
    write_table_csv,
};
use crate::model::{ModelArtifact, ScoreSet, label_column, score_model, train_model};
use crate::plot::{plot_roc_curve, save_figures};
use crate::report::metrics::{MetricsReport, evaluate_performance};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub name: String,
    pub run_dir: RunDir,
    /// 0-based line index where the raw records start.
    pub data_start_line: usize,
    pub cleaned_shape: (usize, usize),
    pub features_shape: (usize, usize),
    pub coercion: CoercionReport,
    pub labeling_method: &'static str,
    pub dropped_rows: usize,
    /// `(label, rows)` in label order.
    pub label_counts: Vec<(i64, usize)>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub model: ModelArtifact,
    pub scores: ScoreSet,
    pub metrics: MetricsReport,
    pub figures: Vec<PathBuf>,
    /// Objects uploaded, when upload is enabled.
    pub uploaded: Option<usize>,
}

/// Run `f` inside the stage's span and tag any error with the stage.
fn stage<T>(stage: Stage, f: impl FnOnce() -> Result<T, AppError>) -> Result<T, AppError> {
    let span = info_span!("stage", name = stage.name());
    let _guard = span.enter();
    debug!("Stage started");
    f().map_err(|e| e.in_stage(stage))
}

/// Download the raw dataset, save it, and run every later stage.
pub fn run_pipeline(loaded: &LoadedConfig) -> Result<RunOutput, AppError> {
    let cfg = &loaded.config;
    let raw = stage(Stage::Acquire, || {
        let bytes = fetch(&cfg.data_source.url, &cfg.data_source.retry)?;
        write_bytes(&cfg.paths.raw_data, &bytes)?;
        Ok(bytes)
    })?;

    run_pipeline_with_raw(loaded, &raw)
}

/// Run the pipeline over raw bytes already in hand.
pub fn run_pipeline_with_raw(loaded: &LoadedConfig, raw: &[u8]) -> Result<RunOutput, AppError> {
    let cfg = &loaded.config;
    let paths = &cfg.paths;

    let run_dir = stage(Stage::Config, || {
        let dir = RunDir::create(&paths.runs_dir, &cfg.run_config.name)?;
        write_bytes(&dir.config_snapshot(), loaded.source.as_bytes())?;
        Ok(dir)
    })?;

    let parsed = stage(Stage::CreateDataset, || {
        let text = String::from_utf8_lossy(raw);
        let parsed = parse_raw_table(&text, &cfg.data_source.columns)?;
        write_table_csv(&paths.cleaned_data, &parsed.table)?;
        Ok(parsed)
    })?;

    let features = stage(Stage::Features, || {
        let outcome = generate_features(&parsed.table, &cfg.generate_features)?;
        write_table_csv(&paths.features_data, &outcome.table)?;
        Ok(outcome)
    })?;

    let label_col = &cfg.labeling.label_column;
    let (labeled, dropped_rows, label_counts) = stage(Stage::Labels, || {
        let outcome = generate_labels(&features.table, &cfg.labeling)?;
        let table = outcome.table.without_columns(&cfg.labeling.drop_columns);
        let counts = count_labels(&label_column(&table, label_col)?);
        info!(classes = counts.len(), dropped_columns = cfg.labeling.drop_columns.len(), "Labeled dataset ready");
        Ok((table, outcome.dropped_rows, counts))
    })?;

    let figures = if cfg.eda.enabled {
        stage(Stage::Eda, || save_figures(&labeled, &run_dir.figures(), label_col, cfg.eda.bins)).unwrap_or_else(
            |err| {
                warn!(error = %err, "EDA figures skipped");
                Vec::new()
            },
        )
    } else {
        Vec::new()
    };

    let (model, train_rows, test) = stage(Stage::Train, || {
        let out = train_model(&labeled, &cfg.model)?;
        write_table_csv(&run_dir.train_csv(), &out.train)?;
        write_table_csv(&run_dir.test_csv(), &out.test)?;
        let model = ModelArtifact::RandomForest(out.model);
        write_model(&paths.model_output, &model)?;
        Ok((model, out.train.n_rows(), out.test))
    })?;

    let scores = stage(Stage::Score, || {
        let scores = score_model(&test, &model, &cfg.model.target_column)?;
        write_scores_csv(&run_dir.scores_csv(), &scores)?;
        Ok(scores)
    })?;

    let metrics = stage(Stage::Evaluate, || {
        let metrics = evaluate_performance(&scores)?;
        write_json(&paths.metrics_output, &metrics)?;
        write_json(&run_dir.path().join("metrics.json"), &metrics)?;

        if cfg.evaluation.plot_roc {
            for path in [paths.chart_output.clone(), run_dir.figures().join("roc_curve.svg")] {
                if let Err(err) = plot_roc_curve(&scores, &path) {
                    warn!(error = %err, path = %path.display(), "ROC curve not rendered");
                }
            }
        }
        Ok(metrics)
    })?;

    let uploaded = if cfg.aws.upload {
        Some(stage(Stage::Upload, || upload_run(&run_dir, &paths.model_output, &cfg.aws))?)
    } else {
        None
    };

    Ok(RunOutput {
        name: cfg.run_config.name.clone(),
        run_dir,
        data_start_line: parsed.header_offset,
        cleaned_shape: parsed.table.shape(),
        features_shape: features.table.shape(),
        coercion: features.coercion,
        labeling_method: cfg.labeling.strategy.name(),
        dropped_rows,
        label_counts,
        train_rows,
        test_rows: test.n_rows(),
        model,
        scores,
        metrics,
        figures,
        uploaded,
    })
}

fn count_labels(labels: &[i64]) -> Vec<(i64, usize)> {
    let mut counts = BTreeMap::new();
    for label in labels {
        *counts.entry(*label).or_insert(0usize) += 1;
    }
    counts.into_iter().collect()
}

/// Upload the run directory under `<prefix>/<run dir name>` and the model
/// directory under `<prefix>/models`.
fn upload_run(run_dir: &RunDir, model_output: &Path, aws: &AwsConfig) -> Result<usize, AppError> {
    let under = |sub: &Path| AwsConfig {
        prefix: object_key(&aws.prefix, sub),
        ..aws.clone()
    };

    let run_name = run_dir.path().file_name().map(Path::new).unwrap_or(Path::new("run"));
    let mut total = upload_artifacts(run_dir.path(), &under(run_name))?;

    match model_output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            total += upload_artifacts(dir, &under(Path::new("models")))?;
        }
        _ => {
            let name = model_output.file_name().map(Path::new).unwrap_or(model_output);
            warn!(model = %name.display(), "Model has no parent directory; not uploaded");
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::ErrorKind;
    use crate::io::{load_model, read_scores_csv, read_table_csv};

    /// Two well-separated IR regimes behind a few metadata lines.
    fn raw_text(rows: usize) -> String {
        let mut text = String::from("Cloud dataset\nAVHRR 16x16 samples, 4 fields\n\n");
        for i in 0..rows {
            let mean = if i % 2 == 0 { 150.0 } else { 250.0 } + (i % 7) as f64;
            let entropy = 1.0 + (i % 5) as f64 * 0.1;
            text.push_str(&format!("{:.1} {:.1} {mean:.1} {entropy:.2}\n", mean - 10.0, mean + 10.0));
        }
        text
    }

    fn config(dir: &Path) -> LoadedConfig {
        let source = format!(
            r#"
run_config:
  name: test_run
paths:
  raw_data: {d}/raw/clouds.data
  cleaned_data: {d}/processed/cleaned.csv
  features_data: {d}/processed/features.csv
  model_output: {d}/models/model.json
  metrics_output: {d}/artifacts/metrics.json
  chart_output: {d}/artifacts/roc.svg
  runs_dir: {d}/runs
data_source:
  url: http://localhost/unused
  columns: [IR_min, IR_max, IR_mean, visible_entropy]
generate_features:
  calculate_norm_range:
    IR_norm_range: {{min_col: IR_min, max_col: IR_max, mean_col: IR_mean}}
  log_transform:
    log_entropy: visible_entropy
labeling:
  method: threshold
  column: IR_mean
  threshold: 200
model:
  test_size: 0.25
  params:
    n_estimators: 10
    max_depth: 4
evaluation:
  plot_roc: true
eda:
  enabled: true
  bins: 8
"#,
            d = dir.display()
        );
        let config = PipelineConfig::from_yaml(&source).unwrap();
        LoadedConfig {
            path: dir.join("config.yaml"),
            source,
            config,
        }
    }

    #[test]
    fn end_to_end_on_local_raw_text() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = config(tmp.path());

        let run = run_pipeline_with_raw(&loaded, raw_text(80).as_bytes()).unwrap();

        assert_eq!(run.data_start_line, 3);
        assert_eq!(run.cleaned_shape, (80, 4));
        assert_eq!(run.features_shape, (80, 6));
        assert_eq!(run.label_counts, vec![(0, 40), (1, 40)]);
        assert_eq!((run.train_rows, run.test_rows), (60, 20));
        assert_eq!(run.scores.len(), 20);
        assert!(run.metrics.accuracy > 0.9);
        assert!((0.0..=1.0).contains(&run.metrics.roc_auc));
        assert!(run.uploaded.is_none());

        // The label source is dropped before training.
        let train = read_table_csv(&run.run_dir.train_csv()).unwrap();
        assert!(!train.has_column("IR_mean"));
        assert!(train.has_column("cloud_type"));

        let snapshot = std::fs::read_to_string(run.run_dir.config_snapshot()).unwrap();
        assert_eq!(snapshot, loaded.source);

        let paths = &loaded.config.paths;
        assert!(paths.cleaned_data.exists());
        assert!(paths.features_data.exists());
        assert!(paths.chart_output.exists());
        assert_eq!(read_scores_csv(&run.run_dir.scores_csv()).unwrap(), run.scores);

        let metrics: MetricsReport =
            serde_json::from_str(&std::fs::read_to_string(&paths.metrics_output).unwrap()).unwrap();
        assert!((metrics.accuracy - run.metrics.accuracy).abs() < 1e-12);

        let reloaded = load_model(&paths.model_output).unwrap();
        let rescored = score_model(&read_table_csv(&run.run_dir.test_csv()).unwrap(), &reloaded, "cloud_type").unwrap();
        assert_eq!(rescored.y_pred(), run.scores.y_pred());
    }

    #[test]
    fn raw_without_data_lines_fails_in_create_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = config(tmp.path());

        let err = run_pipeline_with_raw(&loaded, b"header only\nno numbers here\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.stage(), Some(Stage::CreateDataset));
        assert!(!loaded.config.paths.cleaned_data.exists());
    }

    #[test]
    fn ten_labeled_rows_split_in_half_score_five_records() {
        use crate::domain::{Column, StructuredTable};
        use crate::features::LabelingConfig;
        use crate::model::{ForestParams, ModelConfig};
        use crate::report::metrics::accuracy;

        let ir_mean = [120.0, 260.0, 140.0, 230.0, 180.0, 250.0, 150.0, 210.0, 190.0, 270.0];
        let entropy = [1.1, 1.9, 1.2, 1.7, 1.4, 1.8, 1.0, 1.6, 1.3, 2.0];
        let table = StructuredTable::from_columns(vec![
            Column::from_f64("IR_mean", &ir_mean),
            Column::from_f64("visible_entropy", &entropy),
        ])
        .unwrap();
        let labeled = generate_labels(&table, &LabelingConfig::threshold("IR_mean", 200.0)).unwrap().table;
        assert_eq!(label_column(&labeled, "cloud_type").unwrap(), vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);

        let config = ModelConfig {
            test_size: 0.5,
            params: ForestParams {
                n_estimators: 10,
                ..ForestParams::default()
            },
            ..ModelConfig::default()
        };
        let out = train_model(&labeled, &config).unwrap();
        assert_eq!((out.train.n_rows(), out.test.n_rows()), (5, 5));

        let scores = score_model(&out.test, &ModelArtifact::RandomForest(out.model), "cloud_type").unwrap();
        assert_eq!(scores.len(), 5);
        assert_eq!(scores.records().count(), 5);
        assert!((0.0..=1.0).contains(&accuracy(&scores)));
    }

    #[test]
    fn label_counts_are_sorted() {
        assert_eq!(count_labels(&[1, 0, 1, 2, 1]), vec![(0, 1), (1, 3), (2, 1)]);
        assert!(count_labels(&[]).is_empty());
    }
}
