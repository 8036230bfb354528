//! Input/output helpers.
//!
//! - dataset and score CSVs (`table`)
//! - run directory, JSON, raw bytes, model files (`artifacts`)
//! - object-storage upload (`upload`)

pub mod artifacts;
pub mod table;
pub mod upload;

pub use artifacts::*;
pub use table::*;
pub use upload::{AwsConfig, object_key, upload_artifacts};
