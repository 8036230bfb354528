//! Terminal output for `clouds run` and `clouds evaluate`.
//!
//! Formatting lives here so the pipeline stays free of presentation code.

use crate::app::pipeline::RunOutput;
use crate::domain::CoercionReport;
use crate::model::Classifier;
use crate::report::metrics::{ConfusionMatrix, MetricsReport};

/// Format the full run summary (dataset shapes, labeling, split, metrics).
pub fn format_run_summary(run: &RunOutput) -> String {
    let mut out = String::new();

    out.push_str("=== clouds - Cloud Classification ===\n");
    out.push_str(&format!("Run: {}\n", run.name));
    out.push_str(&format!("Artifacts: {}\n", run.run_dir.path().display()));

    out.push_str("\nDataset:\n");
    out.push_str(&format!("- data starts at line {}\n", run.data_start_line + 1));
    out.push_str(&format!("- cleaned : {} rows x {} cols\n", run.cleaned_shape.0, run.cleaned_shape.1));
    out.push_str(&format!("- features: {} rows x {} cols\n", run.features_shape.0, run.features_shape.1));
    out.push_str(&format_coercion(&run.coercion));

    out.push_str("\nLabels:\n");
    out.push_str(&format!("- method: {}\n", run.labeling_method));
    if run.dropped_rows > 0 {
        out.push_str(&format!("- dropped rows (missing features): {}\n", run.dropped_rows));
    }
    for (label, count) in &run.label_counts {
        out.push_str(&format!("- class {label}: {count}\n"));
    }

    out.push_str("\nModel:\n");
    out.push_str(&format!("- split: train={} test={}\n", run.train_rows, run.test_rows));
    out.push_str(&format!("- features: {}\n", run.model.feature_names().join(", ")));
    out.push_str(&format!("- {}\n", run.model.describe()));

    out.push('\n');
    out.push_str(&format_metrics(&run.metrics));
    out.push('\n');
    out.push_str(&format_confusion(&ConfusionMatrix::from_scores(&run.scores)));

    if !run.figures.is_empty() {
        out.push_str(&format!("\nFigures: {} written\n", run.figures.len()));
    }
    if let Some(n) = run.uploaded {
        out.push_str(&format!("Uploaded: {n} objects\n"));
    }

    out
}

fn format_coercion(report: &CoercionReport) -> String {
    if report.total() == 0 {
        return "- coerced cells: 0\n".to_string();
    }
    let detail: Vec<String> = report
        .coerced_missing
        .iter()
        .map(|(col, n)| format!("{col}={n}"))
        .collect();
    format!("- coerced cells: {} ({})\n", report.total(), detail.join(", "))
}

/// Metrics as a two-column table.
pub fn format_metrics(metrics: &MetricsReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<10} {:>8}\n", "metric", "value"));
    out.push_str(&format!("{:-<10} {:-<8}\n", "", ""));
    out.push_str(&format!("{:<10} {:>8.4}\n", "accuracy", metrics.accuracy));
    out.push_str(&format!("{:<10} {:>8.4}\n", "f1", metrics.f1));
    out.push_str(&format!("{:<10} {:>8.4}\n", "roc_auc", metrics.roc_auc));
    out
}

/// Confusion matrix with true labels as rows.
pub fn format_confusion(cm: &ConfusionMatrix) -> String {
    let mut out = String::from("Confusion (rows=true, cols=pred):\n");

    out.push_str(&format!("{:>8}", ""));
    for label in &cm.labels {
        out.push_str(&format!(" {label:>6}"));
    }
    out.push('\n');

    for (label, row) in cm.labels.iter().zip(&cm.counts) {
        out.push_str(&format!("{label:>8}"));
        for n in row {
            out.push_str(&format!(" {n:>6}"));
        }
        out.push('\n');
    }
    out
}
