//! `lab-doe` library crate.
//!
//! Mixed-model analysis of Design-of-Experiments data for L*a*b colour
//! responses. The binary (`doe`) is a thin wrapper around this library so that:
//!
//! - the analysis is testable without spawning processes
//! - callers can embed [`run_doe`] directly
//!
//! Pipeline: `io` (load + validate) -> `models` (design matrix) -> `fit`
//! (REML + term tests) -> `significance` (log-worth) -> `io::export` / `report`.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod report;
pub mod significance;

pub use app::{run_doe, run_doe_source, DoeRun};
pub use domain::DoeConfig;
pub use error::{DoeError, Result};
