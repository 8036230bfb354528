//! Figures: SVG charts via Plotters and a terminal ROC plot.

pub mod ascii;
pub mod eda;
pub mod roc;

pub use ascii::render_ascii_roc;
pub use eda::save_figures;
pub use roc::plot_roc_curve;
