//! Input/output helpers.
//!
//! - input decoding: paths, raw CSV and base64 payloads (`source`)
//! - CSV ingest + validation (`ingest`)
//! - atomic artifact writers and the output listing (`export`)

pub mod export;
pub mod ingest;
pub mod source;

pub use export::*;
pub use ingest::*;
pub use source::*;
