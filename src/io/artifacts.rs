//! Run artifacts: directory layout, raw bytes, JSON, model files.
//!
//! Every writer creates missing parent directories and overwrites.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::model::ModelArtifact;

/// Per-run output directory: `<root>/<name>_<unix seconds>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    /// Create `<runs_root>/<name>_<timestamp>/figures/`.
    pub fn create(runs_root: &Path, name: &str) -> Result<Self, AppError> {
        let root = runs_root.join(format!("{name}_{}", Utc::now().timestamp()));
        let dir = Self { root };
        fs::create_dir_all(dir.figures())
            .map_err(|e| AppError::io(format!("Failed to create run directory '{}': {e}", dir.root.display())))?;
        info!(path = %dir.root.display(), "Run directory created");
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn config_snapshot(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn train_csv(&self) -> PathBuf {
        self.root.join("train.csv")
    }

    pub fn test_csv(&self) -> PathBuf {
        self.root.join("test.csv")
    }

    pub fn scores_csv(&self) -> PathBuf {
        self.root.join("scores.csv")
    }

    pub fn figures(&self) -> PathBuf {
        self.root.join("figures")
    }
}

pub fn ensure_parent(path: &Path) -> Result<(), AppError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("Failed to create directory '{}': {e}", parent.display()))),
        _ => Ok(()),
    }
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    ensure_parent(path)?;
    fs::write(path, bytes).map_err(|e| AppError::io(format!("Failed to write '{}': {e}", path.display())))?;
    info!(path = %path.display(), bytes = bytes.len(), "File written");
    Ok(())
}

/// Pretty-printed JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    ensure_parent(path)?;
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| AppError::io(format!("Failed to write JSON '{}': {e}", path.display())))?;
    info!(path = %path.display(), "JSON written");
    Ok(())
}

pub fn write_model(path: &Path, model: &ModelArtifact) -> Result<(), AppError> {
    ensure_parent(path)?;
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create model file '{}': {e}", path.display())))?;
    serde_json::to_writer(BufWriter::new(file), model)
        .map_err(|e| AppError::io(format!("Failed to write model '{}': {e}", path.display())))?;
    info!(path = %path.display(), "Model saved");
    Ok(())
}

pub fn load_model(path: &Path) -> Result<ModelArtifact, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open model file '{}': {e}", path.display())))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AppError::format(format!("Invalid model file '{}': {e}", path.display())))
}
