//! Exploratory figures for the labeled dataset, written as SVG.
//!
//! - `correlation_heatmap.svg`: pairwise Pearson correlation of numeric columns
//! - `<column>_hist.svg`: one histogram per feature
//! - `all_features_by_class.svg`: per-feature histograms split by label
//!
//! These figures are informational. Callers treat failures as warnings.

use std::error::Error;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use tracing::{debug, info};

use crate::domain::StructuredTable;
use crate::error::AppError;

const HEATMAP_CELL: u32 = 70;
const HIST_SIZE: (u32, u32) = (640, 420);
const PANEL_SIZE: (u32, u32) = (600, 380);

/// Pearson correlation over rows where both cells are present.
///
/// `None` when fewer than two paired rows exist or either side is constant.
pub fn correlation(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Equal-width histogram: `bins + 1` edges and `bins` counts.
pub fn histogram(values: &[f64], bins: usize) -> (Vec<f64>, Vec<usize>) {
    let bins = bins.max(1);
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (mut lo, mut hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if finite.is_empty() {
        lo = 0.0;
        hi = 1.0;
    } else if hi - lo <= 0.0 {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0usize; bins];
    for v in finite {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    (edges, counts)
}

/// Write every EDA figure into `dir`. Returns the files written.
pub fn save_figures(table: &StructuredTable, dir: &Path, target: &str, bins: usize) -> Result<Vec<PathBuf>, AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::io(format!("Failed to create figures directory '{}': {e}", dir.display())))?;

    let numeric = table.numeric_column_names();
    let features: Vec<&str> = numeric.iter().copied().filter(|c| *c != target).collect();
    let mut written = Vec::new();

    let heatmap = dir.join("correlation_heatmap.svg");
    draw_heatmap(table, &numeric, &heatmap).map_err(|e| render_error(&heatmap, e))?;
    written.push(heatmap);

    for col in &features {
        let path = dir.join(format!("{col}_hist.svg"));
        let values: Vec<f64> = table.numeric(col)?.iter().flatten().copied().collect();
        draw_histogram(col, &values, bins, &path).map_err(|e| render_error(&path, e))?;
        debug!(column = col, "Histogram saved");
        written.push(path);
    }

    if table.has_column(target) && !features.is_empty() {
        let path = dir.join("all_features_by_class.svg");
        draw_by_class(table, &features, target, bins, &path).map_err(|e| render_error(&path, e))?;
        written.push(path);
    }

    info!(dir = %dir.display(), figures = written.len(), "EDA figures saved");
    Ok(written)
}

fn render_error(path: &Path, e: Box<dyn Error>) -> AppError {
    AppError::io(format!("Failed to render '{}': {e}", path.display()))
}

/// Diverging blue-white-red scale over `[-1, 1]`.
fn coolwarm(r: f64) -> RGBColor {
    let lerp = |a: u8, b: u8, t: f64| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    let (cold, mid, warm) = ((59, 76, 192), (221, 221, 221), (180, 4, 38));
    let (from, to, t) = if r < 0.0 { (mid, cold, -r) } else { (mid, warm, r) };
    RGBColor(lerp(from.0, to.0, t), lerp(from.1, to.1, t), lerp(from.2, to.2, t))
}

fn draw_heatmap(table: &StructuredTable, names: &[&str], path: &Path) -> Result<(), Box<dyn Error>> {
    let n = names.len().max(1);
    let columns = names.iter().map(|c| table.numeric(c)).collect::<Result<Vec<_>, _>>()?;

    let side = 160 + HEATMAP_CELL * n as u32;
    let root = SVGBackend::new(path, (side, side)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Correlation Heatmap", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(120)
        .y_label_area_size(120)
        .build_cartesian_2d(0f64..n as f64, 0f64..n as f64)?;
    chart.configure_mesh().disable_mesh().x_labels(0).y_labels(0).draw()?;

    let centered = TextStyle::from(("sans-serif", 13).into_font()).pos(Pos::new(HPos::Center, VPos::Center));
    for (i, a) in columns.iter().enumerate() {
        // First column on top, like a printed matrix.
        let row = (n - 1 - i) as f64;
        for (j, b) in columns.iter().enumerate() {
            let r = correlation(a, b);
            let fill = r.map(coolwarm).unwrap_or(RGBColor(200, 200, 200));
            let x = j as f64;
            chart.draw_series(std::iter::once(Rectangle::new([(x, row), (x + 1.0, row + 1.0)], fill.filled())))?;
            let label = r.map(|v| format!("{v:.2}")).unwrap_or_else(|| "nan".to_string());
            chart.draw_series(std::iter::once(Text::new(label, (x + 0.5, row + 0.5), centered.clone())))?;
        }
    }

    let left = TextStyle::from(("sans-serif", 13).into_font()).pos(Pos::new(HPos::Right, VPos::Center));
    let below = TextStyle::from(("sans-serif", 13).into_font()).pos(Pos::new(HPos::Center, VPos::Top));
    for (i, name) in names.iter().enumerate() {
        let (px, py) = chart.backend_coord(&(0.0, (n - 1 - i) as f64 + 0.5));
        root.draw(&Text::new(name.to_string(), (px - 6, py), left.clone()))?;
        let (px, py) = chart.backend_coord(&(i as f64 + 0.5, 0.0));
        root.draw(&Text::new(name.to_string(), (px, py + 6), below.clone()))?;
    }

    root.present()?;
    Ok(())
}

fn draw_histogram(name: &str, values: &[f64], bins: usize, path: &Path) -> Result<(), Box<dyn Error>> {
    let (edges, counts) = histogram(values, bins);
    let y_max = counts.iter().copied().max().unwrap_or(0).max(1) as f64 * 1.1;

    let root = SVGBackend::new(path, HIST_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Histogram: {name}"), ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(edges[0]..edges[edges.len() - 1], 0f64..y_max)?;
    chart.configure_mesh().x_desc(axis_title(name)).y_desc("Count").draw()?;

    chart.draw_series(
        counts
            .iter()
            .enumerate()
            .map(|(i, c)| Rectangle::new([(edges[i], 0.0), (edges[i + 1], *c as f64)], BLUE.mix(0.6).filled())),
    )?;

    root.present()?;
    Ok(())
}

fn draw_by_class(
    table: &StructuredTable,
    features: &[&str],
    target: &str,
    bins: usize,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let labels = table.numeric(target)?;
    let mut classes: Vec<i64> = labels.iter().flatten().map(|v| v.round() as i64).collect();
    classes.sort_unstable();
    classes.dedup();

    let cols = 2usize;
    let rows = features.len().div_ceil(cols);
    let root = SVGBackend::new(path, (PANEL_SIZE.0 * cols as u32, PANEL_SIZE.1 * rows as u32)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((rows, cols));

    for (panel, name) in panels.iter().zip(features) {
        let values = table.numeric(name)?;
        let all: Vec<f64> = values.iter().flatten().copied().collect();
        let (edges, _) = histogram(&all, bins);

        let per_class: Vec<Vec<usize>> = classes
            .iter()
            .map(|c| {
                let subset: Vec<f64> = values
                    .iter()
                    .zip(labels)
                    .filter_map(|(v, l)| match (v, l) {
                        (Some(v), Some(l)) if l.round() as i64 == *c => Some(*v),
                        _ => None,
                    })
                    .collect();
                bin_into(&subset, &edges)
            })
            .collect();
        let y_max = per_class.iter().flatten().copied().max().unwrap_or(0).max(1) as f64 * 1.1;

        let mut chart = ChartBuilder::on(panel)
            .caption(format!("{name} by Class"), ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(45)
            .build_cartesian_2d(edges[0]..edges[edges.len() - 1], 0f64..y_max)?;
        chart.configure_mesh().x_desc(axis_title(name)).y_desc("Count").draw()?;

        for (k, (class, counts)) in classes.iter().zip(&per_class).enumerate() {
            let color = Palette99::pick(k).mix(0.5);
            chart
                .draw_series(
                    counts
                        .iter()
                        .enumerate()
                        .map(|(i, c)| Rectangle::new([(edges[i], 0.0), (edges[i + 1], *c as f64)], color.filled())),
                )?
                .label(format!("Class {class}"))
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
        }
        chart.configure_series_labels().border_style(&BLACK).draw()?;
    }

    root.present()?;
    Ok(())
}

/// Count `values` into the bins described by `edges` (last bin closed).
fn bin_into(values: &[f64], edges: &[f64]) -> Vec<usize> {
    let bins = edges.len().saturating_sub(1).max(1);
    let (lo, hi) = (edges[0], edges[edges.len() - 1]);
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in values.iter().filter(|v| v.is_finite() && **v >= lo && **v <= hi) {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
}

/// `IR_norm_range` -> `Ir norm range`.
fn axis_title(column: &str) -> String {
    let spaced = column.split('_').collect::<Vec<_>>().join(" ").to_lowercase();
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;

    #[test]
    fn correlation_basics() {
        let a = [Some(1.0), Some(2.0), Some(3.0), None];
        let b = [Some(2.0), Some(4.0), Some(6.0), Some(100.0)];
        let c = [Some(3.0), Some(2.0), Some(1.0), Some(0.0)];
        assert!((correlation(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((correlation(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert!(correlation(&a, &[Some(1.0); 4]).is_none());
    }

    #[test]
    fn histogram_edges_and_counts() {
        let (edges, counts) = histogram(&[0.0, 1.0, 2.0, 3.0, 4.0], 4);
        assert_eq!(edges, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(counts, vec![1, 1, 1, 2]);

        let (edges, counts) = histogram(&[5.0, 5.0], 2);
        assert!((edges[0] - 4.5).abs() < 1e-12);
        assert_eq!(counts.iter().sum::<usize>(), 2);
    }

    #[test]
    fn axis_titles_are_readable() {
        assert_eq!(axis_title("IR_norm_range"), "Ir norm range");
        assert_eq!(axis_title(""), "");
    }

    #[test]
    fn writes_all_figures() {
        let tmp = tempfile::tempdir().unwrap();
        let table = StructuredTable::from_columns(vec![
            Column::from_f64("IR_max", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            Column::numeric("IR_range", vec![Some(0.5), None, Some(0.1), Some(0.9), Some(0.3), Some(0.7)]),
            Column::from_f64("cloud_type", &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
        ])
        .unwrap();

        let files = save_figures(&table, tmp.path(), "cloud_type", 5).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "correlation_heatmap.svg",
                "IR_max_hist.svg",
                "IR_range_hist.svg",
                "all_features_by_class.svg"
            ]
        );
        assert!(files.iter().all(|p| p.is_file()));
    }
}
