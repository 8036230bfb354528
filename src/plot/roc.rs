//! ROC curve rendered to SVG.

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;
use tracing::info;

use crate::error::AppError;
use crate::io::ensure_parent;
use crate::model::ScoreSet;
use crate::report::metrics::{roc_auc, roc_curve};

const SIZE: (u32, u32) = (640, 480);

/// Render the ROC curve of `scores` to `path` as SVG.
///
/// Requires probabilities and binary labels, like `roc_auc`.
pub fn plot_roc_curve(scores: &ScoreSet, path: &Path) -> Result<(), AppError> {
    let points = roc_curve(scores)?;
    let auc = roc_auc(scores)?;
    ensure_parent(path)?;

    draw(path, &points, auc)
        .map_err(|e| AppError::io(format!("Failed to render ROC curve '{}': {e}", path.display())))?;

    info!(path = %path.display(), auc, "ROC curve saved");
    Ok(())
}

fn draw(path: &Path, points: &[(f64, f64)], auc: f64) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("ROC Curve", ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..1f64, 0f64..1f64)?;

    chart
        .configure_mesh()
        .x_desc("False positive rate")
        .y_desc("True positive rate")
        .x_labels(6)
        .y_labels(6)
        .draw()?;

    // Chance diagonal.
    chart.draw_series(LineSeries::new(vec![(0.0, 0.0), (1.0, 1.0)], &BLACK.mix(0.3)))?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(2)))?
        .label(format!("Classifier (AUC = {auc:.3})"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(2)));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
