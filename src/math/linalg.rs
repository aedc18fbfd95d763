//! Dense linear-algebra helpers for the mixed-model fitter.
//!
//! The fitter repeatedly solves small generalized least squares problems
//!
//! ```text
//! minimize (y - Xβ)ᵀ V⁻¹ (y - Xβ)
//! ```
//!
//! for a block-diagonal `V`. Everything here works on `nalgebra` dynamic
//! matrices; the design is tiny (a handful of columns) so clarity beats speed.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Relative residual norm below which a design column counts as aliased.
pub const ALIAS_TOL: f64 = 1e-9;

/// Greedy rank-revealing column selection.
///
/// Walks the columns left to right with modified Gram–Schmidt and keeps a
/// column only if its component orthogonal to the kept columns is at least
/// `tol` times its own norm. Earlier columns therefore win over later ones,
/// which keeps the intercept and main effects ahead of interactions.
pub fn independent_columns(x: &DMatrix<f64>, tol: f64) -> Vec<usize> {
    let mut basis: Vec<DVector<f64>> = Vec::new();
    let mut keep = Vec::new();

    for j in 0..x.ncols() {
        let col: DVector<f64> = x.column(j).into_owned();
        let norm0 = col.norm();
        if !(norm0.is_finite() && norm0 > 0.0) {
            continue;
        }

        let mut v = col;
        // Two passes of projection removal for numerical stability.
        for _ in 0..2 {
            for q in &basis {
                let c = q.dot(&v);
                v.axpy(-c, q, 1.0);
            }
        }

        let norm = v.norm();
        if norm > tol * norm0 {
            basis.push(v / norm);
            keep.push(j);
        }
    }
    keep
}

/// `ln |A|` from a Cholesky factorization `A = L Lᵀ`.
pub fn ln_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

/// Inverse of a symmetric positive definite matrix, `None` if it is not SPD.
pub fn spd_inverse(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let chol = Cholesky::new(a.clone())?;
    let inv = chol.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

/// Quadratic form `bᵀ A⁻¹ b` for SPD `A`.
pub fn inverse_quadratic_form(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<f64> {
    let chol = Cholesky::new(a.clone())?;
    let sol = chol.solve(b);
    let q = b.dot(&sol);
    if q.is_finite() { Some(q) } else { None }
}
