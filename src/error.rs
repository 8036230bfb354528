//! Error type shared by every pipeline stage.
//!
//! Each error carries a kind (which maps to the process exit code), the stage
//! it was raised in (attached by the pipeline), and a human-readable message.

use std::fmt;

/// Broad failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raw input does not match the expected shape.
    Format,
    /// A required configuration key or referenced column is missing/invalid.
    Config,
    /// The requested computation is infeasible for the given data.
    Data,
    /// Persistence or retrieval failed.
    Io,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 2,
            ErrorKind::Format => 3,
            ErrorKind::Data => 4,
            ErrorKind::Io => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Format => "FormatError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Data => "DataError",
            ErrorKind::Io => "IOError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Acquire,
    CreateDataset,
    Features,
    Labels,
    Eda,
    Train,
    Score,
    Evaluate,
    Upload,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Acquire => "acquire",
            Stage::CreateDataset => "create_dataset",
            Stage::Features => "features",
            Stage::Labels => "labels",
            Stage::Eda => "eda",
            Stage::Train => "train",
            Stage::Score => "score",
            Stage::Evaluate => "evaluate",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}{}: {message}", StageSuffix(.stage))]
pub struct AppError {
    kind: ErrorKind,
    stage: Option<Stage>,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// Tag the error with the stage it surfaced from.
    ///
    /// The innermost stage wins: an error already tagged keeps its stage.
    pub fn in_stage(mut self, stage: Stage) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

struct StageSuffix<'a>(&'a Option<Stage>);

impl fmt::Display for StageSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(stage) => write!(f, " in {stage} stage"),
            None => Ok(()),
        }
    }
}
