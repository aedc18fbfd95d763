//! Golden-section minimization on a closed interval.
//!
//! Used to polish the variance ratios found by the grid search. The endpoints
//! are evaluated too, so a boundary optimum (e.g. a zero variance component)
//! is returned exactly instead of being approached from the inside.

const INV_PHI: f64 = 0.618_033_988_749_894_9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimum {
    pub x: f64,
    pub fx: f64,
}

/// Minimize `f` on `[lo, hi]`. Non-finite objective values are treated as `+∞`.
pub fn golden_section<F>(mut f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> Minimum
where
    F: FnMut(f64) -> f64,
{
    let mut eval = |x: f64| {
        let v = f(x);
        if v.is_finite() { v } else { f64::INFINITY }
    };

    let (mut a, mut b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let fa = eval(a);
    let fb = eval(b);

    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);

    for _ in 0..max_iter {
        if (b - a).abs() <= tol {
            break;
        }
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = eval(d);
        }
    }
    let (mut x, mut fx) = if fc <= fd { (c, fc) } else { (d, fd) };
    for (xe, fe) in [(lo.min(hi), fa), (lo.max(hi), fb)] {
        if fe < fx {
            x = xe;
            fx = fe;
        }
    }

    Minimum { x, fx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_interior_minimum() {
        let m = golden_section(|x| (x - 1.3) * (x - 1.3) + 2.0, 0.0, 4.0, 1e-10, 200);
        assert!((m.x - 1.3).abs() < 1e-6);
        assert!((m.fx - 2.0).abs() < 1e-10);
    }

    #[test]
    fn returns_exact_boundary_minimum() {
        let m = golden_section(|x| x + 1.0, 0.0, 1.0, 1e-12, 200);
        assert_eq!(m.x, 0.0);
        assert_eq!(m.fx, 1.0);
    }

    #[test]
    fn non_finite_values_are_avoided() {
        let m = golden_section(|x| if x > 0.5 { f64::NAN } else { (x - 0.25).powi(2) }, 0.0, 1.0, 1e-10, 200);
        assert!((m.x - 0.25).abs() < 1e-5);
    }
}
