//! Data acquisition and raw-format parsing.
//!
//! - download with retry/backoff (`fetch`)
//! - whitespace raw file → `StructuredTable` (`raw`)

pub mod fetch;
pub mod raw;

pub use fetch::{RetryPolicy, fetch, retry_with_backoff};
pub use raw::{RawTable, detect_data_start, parse_raw_table};
