//! Low-level REML fitting for a single response.
//!
//! Given:
//! - a full-rank fixed-effects design `X` (n × p)
//! - observations `y`
//! - an optional grouping with per-group random intercept and slopes
//!
//! the marginal covariance is `σ² V(θ)` with
//!
//! ```text
//! V(θ) = I + Σ_j θ_j² Z_j Z_jᵀ
//! ```
//!
//! where `Z_0` is the group indicator and `Z_j` (j ≥ 1) the group-wise slope
//! covariates. `V` is block diagonal by group, so every evaluation factors one
//! small Cholesky per group.
//!
//! For fixed `θ` the REML criterion is profiled over `β` and `σ²`:
//!
//! ```text
//! σ̂² = rᵀV⁻¹r / (n - p)
//! -2ℓ_R = (n - p) ln(2π σ̂²) + ln|V| + ln|XᵀV⁻¹X| + (n - p)
//! ```
//!
//! `θ` is found by a deterministic grid search (parallel, ties broken by grid
//! index) followed by coordinate-wise golden-section refinement.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rayon::prelude::*;
use tracing::trace;

use crate::domain::GridSettings;
use crate::error::{DoeError, Result};
use crate::fit::ratio_grid::{ratio_axis, ratio_grid};
use crate::math::{golden_section, ln_det, spd_inverse};
use crate::models::natural_cmp;

/// Relative size of `rᵀV⁻¹r` below which the fit counts as exact.
const PERFECT_FIT_TOL: f64 = 1e-20;

/// Fitting options shared by every response of a run.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub grid: GridSettings,
    /// Evaluate the variance-ratio grid on the rayon pool.
    pub parallel: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            parallel: true,
        }
    }
}

/// Grouping structure of the random effects.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomDesign {
    /// Group index of every row.
    pub groups: Vec<usize>,
    /// Group labels in natural order; `labels[g]` names group `g`.
    pub labels: Vec<String>,
    /// Rows of each group, ascending.
    pub blocks: Vec<Vec<usize>>,
    /// Centred covariates with a per-group random slope, one value per row.
    pub slopes: Vec<(String, Vec<f64>)>,
}

impl RandomDesign {
    /// Build from one group label per row.
    pub fn new(row_labels: &[String], slopes: Vec<(String, Vec<f64>)>) -> Self {
        let mut labels: Vec<String> = row_labels.to_vec();
        labels.sort_by(|a, b| natural_cmp(a, b));
        labels.dedup();

        let groups: Vec<usize> = row_labels
            .iter()
            .map(|l| labels.iter().position(|v| v == l).unwrap_or(0))
            .collect();
        let mut blocks = vec![Vec::new(); labels.len()];
        for (row, &g) in groups.iter().enumerate() {
            blocks[g].push(row);
        }

        Self {
            groups,
            labels,
            blocks,
            slopes,
        }
    }

    pub fn n_groups(&self) -> usize {
        self.labels.len()
    }

    /// Number of variance ratios: the intercept plus one per slope.
    pub fn dims(&self) -> usize {
        1 + self.slopes.len()
    }

    /// `V_b(θ)` for one group.
    fn block_covariance(&self, rows: &[usize], theta: &[f64]) -> DMatrix<f64> {
        let m = rows.len();
        let t0 = theta[0] * theta[0];
        let mut v = DMatrix::from_fn(m, m, |i, j| if i == j { 1.0 + t0 } else { t0 });
        for ((_, values), t) in self.slopes.iter().zip(&theta[1..]) {
            let t2 = t * t;
            if t2 == 0.0 {
                continue;
            }
            for i in 0..m {
                for j in 0..m {
                    v[(i, j)] += t2 * values[rows[i]] * values[rows[j]];
                }
            }
        }
        v
    }
}

/// Converged (or best available) REML fit.
#[derive(Debug, Clone)]
pub struct MixedFit {
    pub beta: DVector<f64>,
    /// `σ² (XᵀV⁻¹X)⁻¹`.
    pub cov_beta: DMatrix<f64>,
    /// Residual variance.
    pub sigma2: f64,
    /// Variance ratios `σ_j / σ`; empty without random effects.
    pub theta: Vec<f64>,
    pub reml_deviance: f64,
    pub converged: bool,
}

impl MixedFit {
    /// Variance of the random intercept and of each slope.
    pub fn random_variances(&self) -> Vec<f64> {
        self.theta.iter().map(|t| t * t * self.sigma2).collect()
    }
}

#[derive(Debug, Clone)]
struct Profile {
    deviance: f64,
    beta: DVector<f64>,
    xtvx: DMatrix<f64>,
    sigma2: f64,
}

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    deviance: f64,
}

/// Fit `y ~ X` with the given random effects by REML.
///
/// `label` only feeds error messages and trace events.
pub fn fit_mixed(
    label: &str,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    random: Option<&RandomDesign>,
    opts: &FitOptions,
) -> Result<MixedFit> {
    let n = x.nrows();
    let p = x.ncols();
    if y.len() != n {
        return Err(DoeError::fit(label, format!("{} observations for {n} design rows", y.len())));
    }
    if n <= p {
        return Err(DoeError::fit(
            label,
            format!("not enough rows: {n} observations for {p} fixed-effect columns"),
        ));
    }

    let Some(random) = random else {
        let prof = profile(x, y, None, &[]).map_err(|reason| DoeError::fit(label, reason))?;
        return finish(label, prof, Vec::new(), true);
    };

    let (theta, prof, converged) = optimize_theta(label, x, y, random, &opts.grid, opts.parallel)?;
    finish(label, prof, theta, converged)
}

fn finish(label: &str, prof: Profile, theta: Vec<f64>, converged: bool) -> Result<MixedFit> {
    let inv = spd_inverse(&prof.xtvx)
        .ok_or_else(|| DoeError::fit(label, "fixed-effects information matrix is singular"))?;
    Ok(MixedFit {
        beta: prof.beta,
        cov_beta: inv * prof.sigma2,
        sigma2: prof.sigma2,
        theta,
        reml_deviance: prof.deviance,
        converged,
    })
}

fn optimize_theta(
    label: &str,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    random: &RandomDesign,
    grid: &GridSettings,
    parallel: bool,
) -> Result<(Vec<f64>, Profile, bool)> {
    let dims = random.dims();
    let steps = if dims == 1 {
        grid.steps_intercept
    } else {
        grid.steps_slopes
    };
    let points = ratio_grid(dims, grid.ratio_min, grid.ratio_max, steps)?;
    let axis = ratio_axis(grid.ratio_min, grid.ratio_max, steps)?;

    let objective = |theta: &[f64]| -> f64 {
        profile(x, y, Some(random), theta)
            .map(|p| p.deviance)
            .unwrap_or(f64::INFINITY)
    };

    let evaluate = |(idx, theta): (usize, &Vec<f64>)| {
        let deviance = objective(theta.as_slice());
        deviance.is_finite().then_some(Candidate { idx, deviance })
    };
    let candidates: Vec<Candidate> = if parallel {
        points.par_iter().enumerate().filter_map(evaluate).collect()
    } else {
        points.iter().enumerate().filter_map(evaluate).collect()
    };

    // Deterministic selection: minimum deviance, ties broken by grid index.
    let Some(best) = candidates
        .iter()
        .min_by(|a, b| a.deviance.total_cmp(&b.deviance).then(a.idx.cmp(&b.idx)))
    else {
        // Surface why the simplest model fails instead of a generic message.
        let reason = match profile(x, y, Some(random), &vec![0.0; dims]) {
            Err(reason) => reason,
            Ok(_) => "no finite REML deviance on the variance-ratio grid",
        };
        return Err(DoeError::fit(label, reason));
    };

    let mut theta = points[best.idx].clone();
    let mut current = best.deviance;
    trace!(response = label, ?theta, deviance = current, "grid optimum");

    let mut converged = false;
    for sweep in 0..grid.refine_sweeps {
        let before = current;
        for j in 0..dims {
            let (lo, hi) = bracket(&axis, theta[j], grid.ratio_max);
            let mut trial = theta.clone();
            let m = golden_section(
                |t| {
                    trial[j] = t;
                    objective(trial.as_slice())
                },
                lo,
                hi,
                1e-6 * (hi - lo) + 1e-12,
                200,
            );
            if m.fx < current {
                theta[j] = m.x;
                current = m.fx;
            }
        }
        if (before - current).abs() <= grid.tolerance * (1.0 + current.abs()) {
            trace!(response = label, sweep, "refinement converged");
            converged = true;
            break;
        }
    }

    let at_boundary = theta
        .iter()
        .any(|t| *t >= grid.ratio_max * (1.0 - 1e-12));
    let prof = profile(x, y, Some(random), &theta).map_err(|reason| DoeError::fit(label, reason))?;
    Ok((theta, prof, converged && !at_boundary))
}

/// Search interval around `value`: its neighbours on the grid axis.
fn bracket(axis: &[f64], value: f64, max: f64) -> (f64, f64) {
    let lo = axis.iter().copied().filter(|v| *v < value).fold(0.0, f64::max);
    let hi = axis
        .iter()
        .copied()
        .find(|v| *v > value)
        .unwrap_or(max);
    (lo, hi.max(lo))
}

/// Profiled REML criterion at fixed `θ`.
fn profile(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    random: Option<&RandomDesign>,
    theta: &[f64],
) -> std::result::Result<Profile, &'static str> {
    let n = x.nrows();
    let p = x.ncols();

    let mut xtvx = DMatrix::<f64>::zeros(p, p);
    let mut xtvy = DVector::<f64>::zeros(p);
    let mut yvy = 0.0;
    let mut ln_det_v = 0.0;
    let mut factors: Vec<(Vec<usize>, Cholesky<f64, Dyn>)> = Vec::new();

    match random {
        None => {
            xtvx = x.tr_mul(x);
            xtvy = x.tr_mul(y);
            yvy = y.dot(y);
        }
        Some(random) => {
            for rows in &random.blocks {
                let v = random.block_covariance(rows, theta);
                let chol = Cholesky::new(v).ok_or("variance matrix is not positive definite")?;
                ln_det_v += ln_det(&chol);

                let xb = x.select_rows(rows.iter());
                let yb = y.select_rows(rows.iter());
                let vx = chol.solve(&xb);
                let vy = chol.solve(&yb);
                xtvx += xb.tr_mul(&vx);
                xtvy += xb.tr_mul(&vy);
                yvy += yb.dot(&vy);
                factors.push((rows.clone(), chol));
            }
        }
    }

    let info = Cholesky::new(xtvx.clone()).ok_or("fixed-effects information matrix is singular")?;
    let beta = info.solve(&xtvy);
    let resid = y - x * &beta;

    let rss = if factors.is_empty() {
        resid.dot(&resid)
    } else {
        factors
            .iter()
            .map(|(rows, chol)| {
                let rb = resid.select_rows(rows.iter());
                rb.dot(&chol.solve(&rb))
            })
            .sum()
    };
    if !(rss.is_finite() && rss > PERFECT_FIT_TOL * yvy.max(f64::MIN_POSITIVE)) {
        return Err("residual variance is zero (perfect fit)");
    }

    let dof = (n - p) as f64;
    let sigma2 = rss / dof;
    let deviance = dof * (2.0 * std::f64::consts::PI * sigma2).ln() + ln_det_v + ln_det(&info) + dof;
    if !deviance.is_finite() {
        return Err("REML deviance is not finite");
    }

    Ok(Profile {
        deviance,
        beta,
        xtvx,
        sigma2,
    })
}
