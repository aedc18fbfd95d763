//! Mathematical utilities: rank-revealing column selection, SPD helpers,
//! one-dimensional minimization and distribution tails.

pub mod dist;
pub mod linalg;
pub mod optim;

pub use dist::*;
pub use linalg::*;
pub use optim::*;
