//! Command-line parsing for the cloud classification pipeline.
//!
//! Argument parsing and command dispatch stay separate from the pipeline
//! stages; `app` maps these structs onto library calls.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "clouds", version, about = "Satellite cloud classification pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline: acquire, features, labels, train, score, evaluate.
    Run(RunArgs),
    /// Score a saved model against a labeled CSV dataset.
    Score(ScoreArgs),
    /// Compute metrics (and optionally a ROC curve) from a scores CSV.
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Pipeline config (YAML).
    #[arg(short, long, value_name = "YAML", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Skip the terminal ROC plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Terminal plot width (columns).
    #[arg(long, default_value_t = 60)]
    pub width: usize,

    /// Terminal plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct ScoreArgs {
    /// Model JSON written by `clouds run`.
    #[arg(long, value_name = "JSON")]
    pub model: PathBuf,

    /// Labeled dataset (CSV with header).
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    /// Label column in the dataset.
    #[arg(long, default_value = "cloud_type")]
    pub target: String,

    /// Output scores CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct EvaluateArgs {
    /// Scores CSV (`y_true,y_pred[,y_proba]`).
    #[arg(long, value_name = "CSV")]
    pub scores: PathBuf,

    /// Output metrics JSON.
    #[arg(long, value_name = "JSON")]
    pub out: PathBuf,

    /// Also render the ROC curve to this SVG.
    #[arg(long, value_name = "SVG")]
    pub roc: Option<PathBuf>,
}
