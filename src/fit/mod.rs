//! Model fitting orchestration.
//!
//! Responsibilities:
//!
//! - generate variance-ratio grids for the REML search
//! - fit each response (parallel across responses and grid points)
//! - test fixed-effect terms and apply the convergence retry policy

pub mod fitter;
pub mod ratio_grid;
pub mod selection;

pub use fitter::*;
pub use ratio_grid::*;
pub use selection::*;
