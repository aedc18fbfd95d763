//! Fixed-effects design construction.
//!
//! Predictors are turned into design columns by small, pure functions so the
//! fitter can stay generic over continuous and categorical factors.

pub mod design;

pub use design::*;
