//! Metrics and formatted terminal output.

pub mod format;
pub mod metrics;

pub use format::{format_confusion, format_metrics, format_run_summary};
pub use metrics::{ConfusionMatrix, MetricsReport, evaluate_performance};
