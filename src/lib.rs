//! `cloud-classifier` library crate.
//!
//! The binary (`clouds`) is a thin wrapper around this library so that:
//!
//! - every pipeline stage is testable without spawning processes
//! - the offline `score` / `evaluate` subcommands reuse the same code paths
//!   as the full run

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod features;
pub mod io;
pub mod model;
pub mod plot;
pub mod report;
