//! Domain types used throughout the pipeline.
//!
//! This module defines the `StructuredTable` that every stage consumes and
//! produces, plus its column representation and numeric coercion contract.

pub mod table;

pub use table::*;
