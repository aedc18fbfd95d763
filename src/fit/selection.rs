//! Per-response model fitting and term tests.
//!
//! For every response the pipeline:
//! 1. builds the fixed-effects design on the response's complete rows
//! 2. drops aliased design columns (earlier columns win)
//! 3. fits the random structure by REML, retrying once without slopes
//! 4. tests every term with a Wald F test
//!
//! Denominator degrees of freedom:
//! - without grouping: `n - rank`
//! - with grouping, a term whose columns are constant within every group is
//!   tested against `g - p_between`, anything else against
//!   `n - g - p_within` (the intercept counts as a between-group column)
//!
//! Both are floored at 1.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{
    ColumnKind, DoeConfig, ExperimentTable, FitQuality, FitResult, ModelSpec, RandomStructure, SlopeVariance,
    TermResult, TermStatus, VarianceComponents,
};
use crate::error::DoeError;
use crate::fit::fitter::{fit_mixed, FitOptions, MixedFit, RandomDesign};
use crate::io::ingest::{coerce_response, common_rows, select_rows, RowSelection};
use crate::math::{f_upper_tail, independent_columns, inverse_quadratic_form, ALIAS_TOL};
use crate::models::build_design;

/// What happened to one response.
#[derive(Debug)]
pub enum ResponseOutcome {
    Fitted(FitResult),
    /// The model could not be estimated (rank, convergence, perfect fit).
    NonEstimable {
        response: String,
        reason: String,
        notes: Vec<String>,
        n_used: usize,
        n_excluded: usize,
    },
    /// The response column itself is unusable.
    Failed { response: String, error: DoeError },
}

impl ResponseOutcome {
    pub fn response(&self) -> &str {
        match self {
            ResponseOutcome::Fitted(fit) => &fit.response,
            ResponseOutcome::NonEstimable { response, .. } | ResponseOutcome::Failed { response, .. } => response,
        }
    }

    pub fn fit(&self) -> Option<&FitResult> {
        match self {
            ResponseOutcome::Fitted(fit) => Some(fit),
            _ => None,
        }
    }
}

/// Fit every spec on `table`, in spec order.
pub fn fit_responses(table: &ExperimentTable, specs: &[ModelSpec], config: &DoeConfig) -> Vec<ResponseOutcome> {
    let opts = FitOptions {
        grid: config.grid.clone(),
        parallel: config.parallel,
    };
    let coerced: Vec<Result<Vec<Option<f64>>, DoeError>> =
        specs.iter().map(|s| coerce_response(table, &s.response)).collect();

    let mask = if config.force_full_dataset {
        None
    } else {
        let (valid_specs, valid_values): (Vec<&ModelSpec>, Vec<&[Option<f64>]>) = specs
            .iter()
            .zip(&coerced)
            .filter_map(|(s, c)| c.as_ref().ok().map(|v| (s, v.as_slice())))
            .unzip();
        Some(common_rows(table, &valid_specs, &valid_values))
    };

    let run = |(spec, values): (&ModelSpec, Result<Vec<Option<f64>>, DoeError>)| match values {
        Err(error) => {
            warn!(response = %spec.response, %error, "response column unusable");
            ResponseOutcome::Failed {
                response: spec.response.clone(),
                error,
            }
        }
        Ok(values) => {
            let selection = select_rows(table, spec, &values, mask.as_deref());
            fit_response(table, spec, &selection, &opts)
        }
    };

    let jobs: Vec<_> = specs.iter().zip(coerced).collect();
    if config.parallel {
        jobs.into_par_iter().map(run).collect()
    } else {
        jobs.into_iter().map(run).collect()
    }
}

/// Fit one response on the selected rows.
pub fn fit_response(
    table: &ExperimentTable,
    spec: &ModelSpec,
    selection: &RowSelection,
    opts: &FitOptions,
) -> ResponseOutcome {
    let response = spec.response.as_str();
    let design = build_design(table, &selection.rows, spec);
    let mut notes = Vec::new();

    let random = build_random(table, spec, selection, &mut notes);

    let keep = independent_columns(&design.x, ALIAS_TOL);
    let dropped_columns: Vec<String> = (0..design.x.ncols())
        .filter(|c| !keep.contains(c))
        .map(|c| design.column_names[c].clone())
        .collect();
    if !dropped_columns.is_empty() {
        notes.push(format!("aliased design columns dropped: {}", dropped_columns.join(", ")));
    }
    let x = design.x.select_columns(keep.iter());
    let y = DVector::from_column_slice(&selection.y);

    let attempt = fit_with_retry(response, &x, &y, random, opts, &mut notes);
    let (fit, random) = match attempt {
        Ok(ok) => ok,
        Err(reason) => {
            warn!(response, %reason, "response not estimable");
            return ResponseOutcome::NonEstimable {
                response: response.to_string(),
                reason,
                notes,
                n_used: selection.rows.len(),
                n_excluded: selection.excluded,
            };
        }
    };

    let n = x.nrows();
    let rank = x.ncols();
    let df = DenominatorDf::new(&x, random.as_ref());
    let terms: Vec<TermResult> = design
        .terms
        .iter()
        .skip(1)
        .map(|term| {
            let cols: Vec<usize> = term
                .columns
                .iter()
                .filter_map(|c| keep.iter().position(|k| k == c))
                .collect();
            test_term(&term.name, &cols, &fit, &df)
        })
        .collect();

    let intercept = keep
        .iter()
        .position(|&c| c == 0)
        .map(|i| fit.beta[i])
        .unwrap_or(0.0);

    let random_vars = fit.random_variances();
    let (random_structure, n_groups) = match &random {
        None => (RandomStructure::None, None),
        Some(r) if r.slopes.is_empty() => (RandomStructure::Intercept, Some(r.n_groups())),
        Some(r) => (RandomStructure::InterceptSlopes, Some(r.n_groups())),
    };
    let variance = VarianceComponents {
        residual: fit.sigma2,
        group_intercept: random_vars.first().copied(),
        slopes: random
            .iter()
            .flat_map(|r| r.slopes.iter())
            .zip(random_vars.iter().skip(1))
            .map(|((name, _), v)| SlopeVariance {
                predictor: name.clone(),
                variance: *v,
            })
            .collect(),
    };

    let k = (rank + fit.theta.len() + 1) as f64;
    let quality = FitQuality {
        reml_deviance: fit.reml_deviance,
        aic: fit.reml_deviance + 2.0 * k,
        bic: fit.reml_deviance + k * (n as f64).ln(),
        n_used: n,
        n_excluded: selection.excluded,
        n_groups,
        rank,
    };

    debug!(
        response,
        rank,
        n,
        structure = random_structure.display_name(),
        deviance = fit.reml_deviance,
        "response fitted"
    );

    ResponseOutcome::Fitted(FitResult {
        response: response.to_string(),
        intercept,
        terms,
        skipped: design.skipped,
        dropped_columns,
        variance,
        random_structure,
        converged: fit.converged,
        quality,
        notes,
    })
}

/// Random-effects design for the selected rows, or `None` for a fixed-effects fit.
fn build_random(
    table: &ExperimentTable,
    spec: &ModelSpec,
    selection: &RowSelection,
    notes: &mut Vec<String>,
) -> Option<RandomDesign> {
    let group = spec.group.as_deref()?;
    let cells = table.column(group)?.cells();
    let labels: Vec<String> = selection
        .rows
        .iter()
        .map(|&r| cells[r].level_label().unwrap_or_default())
        .collect();

    let mut distinct = labels.clone();
    distinct.sort();
    distinct.dedup();
    if distinct.len() < 2 {
        notes.push(format!(
            "grouping column `{group}` has fewer than 2 levels; fitted with fixed effects only"
        ));
        return None;
    }

    let mut slopes = Vec::new();
    for name in &spec.random_slopes {
        match slope_values(table, name, &selection.rows, &spec.categorical) {
            Ok(values) => slopes.push((name.clone(), values)),
            Err(why) => notes.push(format!("random slope on `{name}` ignored: {why}")),
        }
    }
    Some(RandomDesign::new(&labels, slopes))
}

fn slope_values(
    table: &ExperimentTable,
    name: &str,
    rows: &[usize],
    categorical: &[String],
) -> Result<Vec<f64>, &'static str> {
    let col = table.column(name).ok_or("column not found")?;
    if table.column_kind(name, categorical) != Some(ColumnKind::Continuous) {
        return Err("predictor is not continuous");
    }
    let raw: Vec<f64> = rows
        .iter()
        .map(|&r| col.cells()[r].as_f64().unwrap_or(0.0))
        .collect();
    let mean = raw.iter().sum::<f64>() / raw.len().max(1) as f64;
    let centred: Vec<f64> = raw.iter().map(|v| v - mean).collect();
    if centred.iter().all(|v| v.abs() <= 1e-12 * mean.abs().max(1.0)) {
        return Err("predictor is constant");
    }
    Ok(centred)
}

/// Full fit, then one retry with the random intercept only.
fn fit_with_retry(
    response: &str,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    random: Option<RandomDesign>,
    opts: &FitOptions,
    notes: &mut Vec<String>,
) -> Result<(MixedFit, Option<RandomDesign>), String> {
    let first = fit_mixed(response, x, y, random.as_ref(), opts);
    let has_slopes = random.as_ref().is_some_and(|r| !r.slopes.is_empty());

    let failure = match first {
        Ok(fit) if fit.converged => return Ok((fit, random)),
        Ok(_) => "REML did not converge".to_string(),
        Err(e) => fit_reason(e),
    };
    if !has_slopes {
        return Err(failure);
    }

    notes.push(format!("random slopes dropped after failed fit: {failure}"));
    let reduced = random.map(|r| RandomDesign { slopes: Vec::new(), ..r });
    match fit_mixed(response, x, y, reduced.as_ref(), opts) {
        Ok(fit) if fit.converged => Ok((fit, reduced)),
        Ok(_) => Err("REML did not converge (random intercept only)".to_string()),
        Err(e) => Err(fit_reason(e)),
    }
}

fn fit_reason(e: DoeError) -> String {
    match e {
        DoeError::StatisticalFit { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Denominator degrees of freedom for the term tests.
enum DenominatorDf {
    Residual(f64),
    Grouped {
        between: f64,
        within: f64,
        /// Per design column: constant within every group.
        is_between: Vec<bool>,
    },
}

impl DenominatorDf {
    fn new(x: &DMatrix<f64>, random: Option<&RandomDesign>) -> Self {
        let n = x.nrows();
        let p = x.ncols();
        let Some(random) = random else {
            return DenominatorDf::Residual(((n - p) as f64).max(1.0));
        };

        let is_between: Vec<bool> = (0..p)
            .map(|c| {
                random.blocks.iter().all(|rows| {
                    let first = rows.first().map(|&r| x[(r, c)]);
                    rows.iter().all(|&r| Some(x[(r, c)]) == first)
                })
            })
            .collect();
        let p_between = is_between.iter().filter(|b| **b).count();
        let p_within = p - p_between;
        let g = random.n_groups();

        DenominatorDf::Grouped {
            between: (g as f64 - p_between as f64).max(1.0),
            within: (n as f64 - g as f64 - p_within as f64).max(1.0),
            is_between,
        }
    }

    fn for_columns(&self, cols: &[usize]) -> f64 {
        match self {
            DenominatorDf::Residual(df) => *df,
            DenominatorDf::Grouped {
                between,
                within,
                is_between,
            } => {
                if cols.iter().all(|&c| is_between[c]) {
                    *between
                } else {
                    *within
                }
            }
        }
    }
}

/// Wald F test of `β_cols = 0`.
fn test_term(name: &str, cols: &[usize], fit: &MixedFit, df: &DenominatorDf) -> TermResult {
    if cols.is_empty() {
        return TermResult::non_estimable(name);
    }
    let b = DVector::from_iterator(cols.len(), cols.iter().map(|&c| fit.beta[c]));
    let cov = fit.cov_beta.select_rows(cols.iter()).select_columns(cols.iter());
    let Some(quad) = inverse_quadratic_form(&cov, &b) else {
        return TermResult::non_estimable(name);
    };

    let q = cols.len();
    let statistic = quad / q as f64;
    let df_den = df.for_columns(cols);

    // Largest-magnitude contrast stands in for multi-column terms.
    let lead = (0..q)
        .max_by(|&i, &j| b[i].abs().total_cmp(&b[j].abs()).then(j.cmp(&i)))
        .unwrap_or(0);

    TermResult {
        term: name.to_string(),
        columns: q,
        estimate: Some(b[lead]),
        std_error: Some(cov[(lead, lead)].sqrt()),
        statistic: Some(statistic),
        df_num: q,
        df_den: Some(df_den),
        p_value: f_upper_tail(statistic, q as f64, df_den),
        status: TermStatus::Estimated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PredictorSelection, SkipReason};
    use crate::io::ingest::load_table;
    use crate::io::source::CsvSource;

    const NOISE: [f64; 12] = [0.3, -0.2, 0.1, -0.4, 0.2, 0.0, 0.1, -0.1, 0.3, -0.3, 0.2, -0.2];

    fn config(predictors: &[&str]) -> DoeConfig {
        DoeConfig {
            response_columns: vec!["Lvalue".to_string()],
            predictors: PredictorSelection::Explicit(predictors.iter().map(|s| s.to_string()).collect()),
            parallel: false,
            ..DoeConfig::default()
        }
    }

    fn fit_csv(csv: &str, cfg: &DoeConfig) -> ResponseOutcome {
        let table = load_table(&CsvSource::Bytes(csv.as_bytes().to_vec()), cfg).unwrap();
        let specs = cfg.model_specs(&table);
        fit_responses(&table, &specs, cfg).remove(0)
    }

    fn factorial_csv() -> String {
        let mut csv = String::from("Temp,Pigment,Twice,Batch,Lvalue\n");
        for (i, noise) in NOISE.iter().enumerate() {
            let temp = [10.0, 20.0, 30.0][i % 3];
            let pigment = ["a", "b"][(i / 3) % 2];
            let batch = i / 3;
            let y = 50.0 + 0.5 * temp + noise + 2.0 * batch as f64;
            csv.push_str(&format!("{temp},{pigment},{},{batch},{y}\n", 2.0 * temp));
        }
        csv
    }

    #[test]
    fn strong_effect_is_significant_and_null_effect_is_not() {
        let outcome = fit_csv(&factorial_csv(), &config(&["Temp", "Pigment"]));
        let fit = outcome.fit().unwrap();
        let names: Vec<&str> = fit.terms.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(names, vec!["Temp", "Pigment"]);
        assert_eq!(fit.random_structure, RandomStructure::None);

        let temp = &fit.terms[0];
        assert!(temp.p_value.unwrap() < 1e-3, "{temp:?}");
        assert!((temp.estimate.unwrap() - 0.5).abs() < 0.2);
        assert_eq!(temp.df_den, Some(9.0));
        assert_eq!(fit.quality.rank, 3);
    }

    #[test]
    fn aliased_predictor_is_non_estimable() {
        let outcome = fit_csv(&factorial_csv(), &config(&["Temp", "Twice"]));
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.terms[1].status, TermStatus::NonEstimable);
        assert_eq!(fit.dropped_columns, vec!["Twice".to_string()]);
        assert!(fit.terms[0].p_value.is_some());
    }

    #[test]
    fn perfect_fit_is_non_estimable() {
        let csv = "Temp,Lvalue\n1,2\n2,4\n3,6\n4,8\n";
        match fit_csv(csv, &config(&["Temp"])) {
            ResponseOutcome::NonEstimable { reason, n_used, .. } => {
                assert!(reason.contains("perfect fit"), "{reason}");
                assert_eq!(n_used, 4);
            }
            other => panic!("expected non-estimable, got {other:?}"),
        }
    }

    #[test]
    fn single_level_group_falls_back_to_fixed_effects() {
        let csv = "Temp,Line,Lvalue\n1,A,2.1\n2,A,3.9\n3,A,6.2\n4,A,7.8\n";
        let cfg = DoeConfig {
            group: Some("Line".to_string()),
            ..config(&["Temp"])
        };
        let outcome = fit_csv(csv, &cfg);
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.random_structure, RandomStructure::None);
        assert!(fit.notes.iter().any(|n| n.contains("fewer than 2 levels")));
    }

    #[test]
    fn grouped_fit_uses_between_and_within_df() {
        let cfg = DoeConfig {
            group: Some("Batch".to_string()),
            ..config(&["Temp", "Pigment"])
        };
        let outcome = fit_csv(&factorial_csv(), &cfg);
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.quality.n_groups, Some(4));
        assert!(fit.variance.group_intercept.is_some());
        // Pigment is constant within each batch: g - p_between = 4 - 2.
        assert_eq!(fit.terms[1].df_den, Some(2.0));
        // Temp varies within batches: n - g - p_within = 12 - 4 - 1.
        assert_eq!(fit.terms[0].df_den, Some(7.0));
    }

    #[test]
    fn categorical_random_slope_is_ignored_with_note() {
        let cfg = DoeConfig {
            group: Some("Batch".to_string()),
            random_slopes: vec!["Pigment".to_string()],
            ..config(&["Temp", "Pigment"])
        };
        let outcome = fit_csv(&factorial_csv(), &cfg);
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.random_structure, RandomStructure::Intercept);
        assert!(fit.notes.iter().any(|n| n.contains("random slope on `Pigment` ignored")));
    }

    #[test]
    fn constant_predictor_is_reported_as_skipped() {
        let csv = "Temp,Line,Lvalue\n1,7,2.1\n2,7,3.9\n3,7,6.2\n4,7,7.8\n";
        let outcome = fit_csv(csv, &config(&["Temp", "Line"]));
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.skipped[0].reason, SkipReason::SkippedConstant);
        assert_eq!(fit.terms.len(), 1);
    }

    #[test]
    fn type_error_fails_only_that_response() {
        let csv = "Temp,Lvalue,Avalue\n1,2.1,x\n2,3.9,1\n3,6.2,2\n4,7.8,3\n";
        let cfg = DoeConfig {
            response_columns: vec!["Lvalue".to_string(), "Avalue".to_string()],
            ..config(&["Temp"])
        };
        let table = load_table(&CsvSource::Bytes(csv.as_bytes().to_vec()), &cfg).unwrap();
        let outcomes = fit_responses(&table, &cfg.model_specs(&table), &cfg);
        assert_eq!(outcomes[0].response(), "Lvalue");
        assert!(outcomes[0].fit().is_some());
        assert!(matches!(
            &outcomes[1],
            ResponseOutcome::Failed { error: DoeError::Type { row: 2, .. }, .. }
        ));
    }

    /// Four batches of six rows; each batch has its own line in `X`.
    fn slope_csv(slope_dev: [f64; 4], noise_scale: f64) -> String {
        let offsets = [1.0, -1.0, 0.5, -0.5];
        let mut csv = String::from("X,Batch,Lvalue\n");
        for b in 0..4 {
            for k in 0..6 {
                let x = k as f64;
                let noise = (((b * 6 + k) * 7) % 5) as f64 * noise_scale - 2.0 * noise_scale;
                let y = 10.0 + 2.0 * x + slope_dev[b] * (x - 2.5) + offsets[b] + noise;
                csv.push_str(&format!("{x},B{b},{y}\n"));
            }
        }
        csv
    }

    fn slope_config() -> DoeConfig {
        DoeConfig {
            group: Some("Batch".to_string()),
            random_slopes: vec!["X".to_string()],
            ..config(&["X"])
        }
    }

    #[test]
    fn random_slope_is_estimated() {
        let outcome = fit_csv(&slope_csv([-0.3, 0.1, 0.4, -0.2], 0.1), &slope_config());
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.random_structure, RandomStructure::InterceptSlopes);
        assert!(fit.converged);
        assert_eq!(fit.variance.slopes.len(), 1);
        assert_eq!(fit.variance.slopes[0].predictor, "X");
        assert!(fit.variance.slopes[0].variance > 0.01, "{:?}", fit.variance);
        assert!(fit.notes.is_empty(), "{:?}", fit.notes);
        // X varies within batches.
        assert_eq!(fit.terms[0].df_den, Some(24.0 - 4.0 - 1.0));
    }

    #[test]
    fn diverging_slope_fit_retries_with_intercept_only() {
        // Batch slopes differ by ~5 against noise of ~1e-3: the slope ratio
        // runs into the top of the grid.
        let outcome = fit_csv(&slope_csv([-5.0, 3.0, 8.0, -6.0], 1e-3), &slope_config());
        let fit = outcome.fit().unwrap();
        assert_eq!(fit.random_structure, RandomStructure::Intercept);
        assert!(fit.converged);
        assert!(fit.variance.slopes.is_empty());
        assert!(
            fit.notes
                .iter()
                .any(|n| n.starts_with("random slopes dropped after failed fit")),
            "{:?}",
            fit.notes
        );
    }

    #[test]
    fn parallel_and_serial_runs_agree() {
        let cfg = DoeConfig {
            group: Some("Batch".to_string()),
            ..config(&["Temp", "Pigment"])
        };
        let par = DoeConfig {
            parallel: true,
            ..cfg.clone()
        };
        let a = fit_csv(&factorial_csv(), &cfg);
        let b = fit_csv(&factorial_csv(), &par);
        assert_eq!(a.fit(), b.fit());
    }
}
