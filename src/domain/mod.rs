//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the loaded experiment table (`ExperimentTable`, `Column`, `Cell`)
//! - per-response model specifications (`ModelSpec`)
//! - fit outputs (`FitResult`, `TermResult`, `VarianceComponents`, etc.)
//! - run configuration (`DoeConfig`, `PredictorSelection`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
