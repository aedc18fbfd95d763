//! Variance-ratio grid generation.
//!
//! Random-effect variances are searched as ratios `θ_j = σ_j / σ` on a
//! deterministic grid before any local refinement:
//! - the grid always contains `0` (component absent)
//! - non-zero points are log-spaced between `ratio_min` and `ratio_max`
//! - with several components the grid is the cartesian product of the axes,
//!   enumerated with the last dimension varying fastest

use crate::domain::MAX_GRID_POINTS;
use crate::error::{DoeError, Result};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(DoeError::Config(format!(
            "invalid ratio range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(DoeError::Config("ratio steps must be >= 2".to_string()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    // Keep the top endpoint exact; boundary detection compares against it.
    if let Some(last) = out.last_mut() {
        *last = max;
    }
    Ok(out)
}

/// One search axis: `0` followed by the log-spaced ratios.
pub fn ratio_axis(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    let mut axis = vec![0.0];
    axis.extend(log_space(min, max, steps)?);
    Ok(axis)
}

/// Cartesian grid over `dims` identical axes, at most `MAX_GRID_POINTS` points.
pub fn ratio_grid(dims: usize, min: f64, max: f64, steps: usize) -> Result<Vec<Vec<f64>>> {
    let axis = ratio_axis(min, max, steps)?;
    let size = u32::try_from(dims).ok().and_then(|d| axis.len().checked_pow(d));
    if !size.is_some_and(|n| n <= MAX_GRID_POINTS) {
        return Err(DoeError::Config(format!(
            "variance-ratio grid of {} axes x {} points exceeds {MAX_GRID_POINTS} points",
            dims,
            axis.len()
        )));
    }
    let mut grid: Vec<Vec<f64>> = vec![Vec::with_capacity(dims)];
    for _ in 0..dims {
        grid = grid
            .into_iter()
            .flat_map(|prefix| {
                axis.iter().map(move |&v| {
                    let mut next = prefix.clone();
                    next.push(v);
                    next
                })
            })
            .collect();
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.1, 10.0, 5).unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert_eq!(v[v.len() - 1], 10.0);
        assert!((v[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn log_space_rejects_bad_ranges() {
        assert!(log_space(0.0, 1.0, 5).is_err());
        assert!(log_space(1.0, 1.0, 5).is_err());
        assert!(log_space(0.1, 1.0, 1).is_err());
    }

    #[test]
    fn axis_starts_at_zero() {
        let axis = ratio_axis(1e-2, 1e2, 3).unwrap();
        assert_eq!(axis.len(), 4);
        assert_eq!(axis[0], 0.0);
    }

    #[test]
    fn grid_is_cartesian_in_row_major_order() {
        let grid = ratio_grid(2, 1.0, 10.0, 2).unwrap();
        assert_eq!(grid.len(), 9);
        assert_eq!(grid[0], vec![0.0, 0.0]);
        assert_eq!(grid[1], vec![0.0, 1.0]);
        assert_eq!(grid[8], vec![10.0, 10.0]);
    }

    #[test]
    fn oversized_grid_is_rejected_before_allocation() {
        assert_eq!(ratio_grid(4, 1e-3, 1e3, 9).unwrap().len(), 10_000);
        assert!(matches!(ratio_grid(6, 1e-3, 1e3, 9), Err(DoeError::Config(_))));
        assert!(ratio_grid(usize::MAX, 1e-3, 1e3, 9).is_err());
    }

    #[test]
    fn zero_dimensions_give_single_empty_point() {
        assert_eq!(ratio_grid(0, 1.0, 10.0, 3).unwrap(), vec![Vec::<f64>::new()]);
    }
}
