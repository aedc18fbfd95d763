//! Synthetic datasets.

pub mod sample;

pub use sample::*;
