//! Fixed-effects design matrix.
//!
//! Column layout:
//! - column 0 is the intercept
//! - continuous predictors contribute one column (raw values)
//! - categorical predictors contribute one indicator column per non-reference
//!   level; the reference is the first level in natural sort order
//! - optional two-way interactions contribute the products of the two
//!   predictors' columns, with continuous predictors centred first
//!
//! Predictors that cannot be estimated at all (constant, or an identifier
//! with a distinct level per row) never reach the matrix and are reported
//! as skipped.

use std::cmp::Ordering;

use nalgebra::DMatrix;

use crate::domain::{ColumnKind, ExperimentTable, ModelSpec, SkipReason, SkippedTerm};

pub const INTERCEPT: &str = "Intercept";

/// Relative range below which a continuous predictor counts as constant.
const CONSTANT_TOL: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
enum Encoding {
    Continuous { values: Vec<f64>, mean: f64 },
    /// `codes[i]` indexes `levels`; code 0 is the reference level.
    Categorical { levels: Vec<String>, codes: Vec<usize> },
}

/// A predictor restricted to the rows being fitted.
#[derive(Debug, Clone, PartialEq)]
struct Factor {
    name: String,
    encoding: Encoding,
}

impl Factor {
    /// Design columns as `(label, values)`.
    fn block(&self, centered: bool) -> Vec<(String, Vec<f64>)> {
        match &self.encoding {
            Encoding::Continuous { values, mean } => {
                let shift = if centered { *mean } else { 0.0 };
                vec![(self.name.clone(), values.iter().map(|v| v - shift).collect())]
            }
            Encoding::Categorical { levels, codes } => levels
                .iter()
                .enumerate()
                .skip(1)
                .map(|(k, level)| {
                    let col = codes.iter().map(|&c| if c == k { 1.0 } else { 0.0 }).collect();
                    (format!("{}[{level}]", self.name), col)
                })
                .collect(),
        }
    }
}

/// One model term and the design columns it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignTerm {
    pub name: String,
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Design {
    pub x: DMatrix<f64>,
    pub column_names: Vec<String>,
    /// `terms[0]` is always the intercept.
    pub terms: Vec<DesignTerm>,
    pub skipped: Vec<SkippedTerm>,
}

/// Build the design for `spec` on the given table rows.
pub fn build_design(table: &ExperimentTable, rows: &[usize], spec: &ModelSpec) -> Design {
    let mut factors = Vec::new();
    let mut skipped = Vec::new();

    for (i, name) in spec.predictors.iter().enumerate() {
        if spec.predictors[..i].contains(name) {
            continue;
        }
        match extract_factor(table, name, rows, &spec.categorical) {
            Some(Ok(f)) => factors.push(f),
            Some(Err(reason)) => skipped.push(SkippedTerm {
                term: name.clone(),
                reason,
            }),
            None => {}
        }
    }

    let n = rows.len();
    let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
    let mut column_names = vec![INTERCEPT.to_string()];
    let mut terms = vec![DesignTerm {
        name: INTERCEPT.to_string(),
        columns: vec![0],
    }];

    let mut push_term = |name: String, block: Vec<(String, Vec<f64>)>| {
        let start = columns.len();
        for (label, values) in block {
            column_names.push(label);
            columns.push(values);
        }
        terms.push(DesignTerm {
            name,
            columns: (start..columns.len()).collect(),
        });
    };

    for f in &factors {
        push_term(f.name.clone(), f.block(false));
    }

    if spec.interactions {
        for (i, a) in factors.iter().enumerate() {
            for b in &factors[i + 1..] {
                let mut block = Vec::new();
                for (la, va) in a.block(true) {
                    for (lb, vb) in b.block(true) {
                        let prod = va.iter().zip(&vb).map(|(p, q)| p * q).collect();
                        block.push((format!("{la}*{lb}"), prod));
                    }
                }
                push_term(format!("{}*{}", a.name, b.name), block);
            }
        }
    }

    let x = DMatrix::from_fn(n, columns.len(), |r, c| columns[c][r]);
    Design {
        x,
        column_names,
        terms,
        skipped,
    }
}

/// `None` when the column does not exist; `Some(Err(_))` when it exists but
/// cannot be estimated.
fn extract_factor(
    table: &ExperimentTable,
    name: &str,
    rows: &[usize],
    categorical: &[String],
) -> Option<Result<Factor, SkipReason>> {
    let col = table.column(name)?;
    let kind = table.column_kind(name, categorical)?;
    let cells = col.cells();

    let encoding = match kind {
        ColumnKind::Continuous => {
            let values: Vec<f64> = rows
                .iter()
                .map(|&r| cells[r].as_f64().unwrap_or(f64::NAN))
                .collect();
            let (min, max) = values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let scale = min.abs().max(max.abs()).max(1.0);
            if !(max - min > CONSTANT_TOL * scale) {
                return Some(Err(SkipReason::SkippedConstant));
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Encoding::Continuous { values, mean }
        }
        ColumnKind::Categorical => {
            let labels: Vec<String> = rows
                .iter()
                .map(|&r| cells[r].level_label().unwrap_or_default())
                .collect();
            let mut levels = labels.clone();
            levels.sort_by(|a, b| natural_cmp(a, b));
            levels.dedup();
            if levels.len() < 2 {
                return Some(Err(SkipReason::SkippedConstant));
            }
            if levels.len() == rows.len() && rows.len() > 2 {
                return Some(Err(SkipReason::SkippedUniqueLevels));
            }
            let codes = labels
                .iter()
                .map(|l| levels.iter().position(|v| v == l).unwrap_or(0))
                .collect();
            Encoding::Categorical { levels, codes }
        }
    };

    Some(Ok(Factor {
        name: name.to_string(),
        encoding,
    }))
}

/// Numeric order when both labels are numbers, numbers before text, text
/// lexicographic.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
