//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads the pipeline config
//! - runs the pipeline or one of the offline subcommands
//! - prints summaries and the terminal ROC plot

use clap::Parser;
use tracing::warn;

use crate::cli::{Command, EvaluateArgs, RunArgs, ScoreArgs};
use crate::error::{AppError, Stage};
use crate::io::{load_model, read_scores_csv, read_table_csv, write_json, write_scores_csv};
use crate::model::{ScoreSet, score_model};
use crate::plot::{plot_roc_curve, render_ascii_roc};
use crate::report::metrics::{accuracy, evaluate_performance, roc_curve};
use crate::report::{format_metrics, format_run_summary};

pub mod pipeline;

/// Entry point for the `clouds` binary.
pub fn run() -> Result<(), AppError> {
    // `clouds` and `clouds --config x.yaml` behave like `clouds run ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Score(args) => handle_score(args),
        Command::Evaluate(args) => handle_evaluate(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let loaded = crate::config::load_config(&args.config).map_err(|e| e.in_stage(Stage::Config))?;
    let run = pipeline::run_pipeline(&loaded)?;

    println!("{}", format_run_summary(&run));

    if !args.no_plot && run.scores.y_proba().is_some() {
        match roc_curve(&run.scores) {
            Ok(curve) => println!("{}", render_ascii_roc(&curve, run.metrics.roc_auc, args.width, args.height)),
            Err(err) => warn!(error = %err, "Terminal ROC plot skipped"),
        }
    }
    Ok(())
}

fn handle_score(args: ScoreArgs) -> Result<(), AppError> {
    let scores = score_to_csv(&args).map_err(|e| e.in_stage(Stage::Score))?;

    println!("Scored {} rows -> {}", scores.len(), args.out.display());
    println!("accuracy: {:.4}", accuracy(&scores));
    Ok(())
}

fn score_to_csv(args: &ScoreArgs) -> Result<ScoreSet, AppError> {
    let model = load_model(&args.model)?;
    let data = read_table_csv(&args.data)?;
    let scores = score_model(&data, &model, &args.target)?;
    write_scores_csv(&args.out, &scores)?;
    Ok(scores)
}

fn handle_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let scores = read_scores_csv(&args.scores).map_err(|e| e.in_stage(Stage::Evaluate))?;
    let metrics = evaluate_performance(&scores)
        .and_then(|m| write_json(&args.out, &m).map(|()| m))
        .map_err(|e| e.in_stage(Stage::Evaluate))?;

    if let Some(path) = &args.roc {
        if let Err(err) = plot_roc_curve(&scores, path) {
            warn!(error = %err, path = %path.display(), "ROC curve not rendered");
        }
    }

    print!("{}", format_metrics(&metrics));
    if let Ok(curve) = roc_curve(&scores) {
        println!("\n{}", render_ascii_roc(&curve, metrics.roc_auc, 60, 20));
    }
    Ok(())
}

/// Rewrite argv so `clouds` defaults to `clouds run`.
///
/// Rules:
/// - `clouds`                     -> `clouds run`
/// - `clouds --config x.yaml ...` -> `clouds run --config x.yaml ...`
/// - `clouds --help/--version/-h` -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(arg1.as_str(), "-h" | "--help" | "-V" | "--version" | "help");
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "run" | "score" | "evaluate");
    if is_subcommand {
        return argv;
    }

    // A leading flag is a `run` flag.
    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
        return argv;
    }

    argv
}
