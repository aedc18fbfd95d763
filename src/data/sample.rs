//! Synthetic L*a*b DOE sample generation.
//!
//! Produces a small factorial experiment with known effects so the pipeline
//! can be demonstrated (`doe sample`) and tested end to end:
//!
//! - `Temp` (continuous, 160/180/200) shifts `Lvalue`
//! - `Pigment` (categorical) shifts `Lvalue` and `Avalue`
//! - `Additive` (continuous, 0/1/2) shifts `Bvalue`
//! - `Batch` adds a random offset to every response
//!
//! Generation is seeded, so the same spec always yields the same CSV.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::error::{DoeError, Result};

const TEMPS: [f64; 3] = [160.0, 180.0, 200.0];
const PIGMENTS: [&str; 3] = ["blue", "red", "white"];
const ADDITIVES: [f64; 3] = [0.0, 1.0, 2.0];

/// `Lvalue` change per degree of `Temp`.
pub const TEMP_EFFECT_L: f64 = 0.08;
/// `Bvalue` change per unit of `Additive`.
pub const ADDITIVE_EFFECT_B: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSpec {
    pub batches: usize,
    pub rows_per_batch: usize,
    pub seed: u64,
    /// Residual standard deviation of every response.
    pub noise_sd: f64,
    /// Standard deviation of the per-batch offsets.
    pub batch_sd: f64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            batches: 4,
            rows_per_batch: 9,
            seed: 42,
            noise_sd: 0.3,
            batch_sd: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleData {
    /// CSV text with header `Batch,Temp,Pigment,Additive,Lvalue,Avalue,Bvalue`.
    pub csv: String,
    pub rows: usize,
}

pub fn generate_doe(spec: &SampleSpec) -> Result<SampleData> {
    if spec.batches == 0 || spec.rows_per_batch == 0 {
        return Err(DoeError::Config("sample needs at least one batch and one row per batch".to_string()));
    }
    for (name, sd) in [("noise", spec.noise_sd), ("batch", spec.batch_sd)] {
        if !(sd.is_finite() && sd >= 0.0) {
            return Err(DoeError::Config(format!("{name} sd must be finite and >= 0, got {sd}")));
        }
    }
    let noise = Normal::new(0.0, spec.noise_sd)
        .map_err(|e| DoeError::Config(format!("invalid noise sd {}: {e}", spec.noise_sd)))?;
    let batch_dist = Normal::new(0.0, spec.batch_sd)
        .map_err(|e| DoeError::Config(format!("invalid batch sd {}: {e}", spec.batch_sd)))?;

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let batch_offsets: Vec<[f64; 3]> = (0..spec.batches)
        .map(|_| {
            [
                batch_dist.sample(&mut rng),
                batch_dist.sample(&mut rng),
                batch_dist.sample(&mut rng),
            ]
        })
        .collect();

    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(["Batch", "Temp", "Pigment", "Additive", "Lvalue", "Avalue", "Bvalue"])
        .map_err(encode_error)?;

    let rows = spec.batches * spec.rows_per_batch;
    for k in 0..rows {
        let batch = k / spec.rows_per_batch;
        let temp = TEMPS[k % 3];
        let pigment = (k / 3) % 3;
        // Latin square over (Temp, Pigment) within every block of nine rows.
        let additive = ADDITIVES[(k + k / 3) % 3];
        let offset = batch_offsets[batch];

        let l = 60.0 + TEMP_EFFECT_L * (temp - 180.0) + [0.0, -4.0, 6.0][pigment] + offset[0];
        let a = 2.0 + [0.0, 8.0, -1.0][pigment] + offset[1];
        let b = 10.0 + ADDITIVE_EFFECT_B * additive + offset[2];

        w.write_record([
            format!("B{:02}", batch + 1),
            format!("{temp}"),
            PIGMENTS[pigment].to_string(),
            format!("{additive}"),
            format!("{:.3}", l + noise.sample(&mut rng)),
            format!("{:.3}", a + noise.sample(&mut rng)),
            format!("{:.3}", b + noise.sample(&mut rng)),
        ])
        .map_err(encode_error)?;
    }

    let bytes = w.into_inner().map_err(|e| encode_error(e.into_error().into()))?;
    let csv = String::from_utf8(bytes).map_err(|e| DoeError::Input(format!("sample is not UTF-8: {e}")))?;
    Ok(SampleData { csv, rows })
}

fn encode_error(e: csv::Error) -> DoeError {
    DoeError::io("Failed to encode sample CSV", e.into())
}
