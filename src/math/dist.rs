//! Distribution tails for hypothesis tests.

use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Upper-tail probability `P(F(df1, df2) ≥ f)`.
///
/// Returns `None` for invalid inputs (negative/non-finite statistic or
/// non-positive degrees of freedom). The result is clamped to `[0, 1]`.
pub fn f_upper_tail(f: f64, df1: f64, df2: f64) -> Option<f64> {
    if !(f.is_finite() && f >= 0.0 && df1 > 0.0 && df2 > 0.0 && df1.is_finite() && df2.is_finite()) {
        return None;
    }
    let dist = FisherSnedecor::new(df1, df2).ok()?;
    let p = dist.sf(f);
    if p.is_nan() { None } else { Some(p.clamp(0.0, 1.0)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_statistic_has_unit_tail() {
        let p = f_upper_tail(0.0, 1.0, 10.0).unwrap();
        assert!((p - 1.0).abs() < 1e-12);
    }

    #[test]
    fn matches_known_critical_value() {
        // F(1, 10) critical value at α = 0.05 is 4.9646.
        let p = f_upper_tail(4.9646, 1.0, 10.0).unwrap();
        assert!((p - 0.05).abs() < 1e-4, "p={p}");
    }

    #[test]
    fn huge_statistic_is_tiny_but_valid() {
        let p = f_upper_tail(1e6, 2.0, 30.0).unwrap();
        assert!((0.0..1e-20).contains(&p));
    }

    #[test]
    fn invalid_inputs_yield_none() {
        assert!(f_upper_tail(-1.0, 1.0, 10.0).is_none());
        assert!(f_upper_tail(1.0, 0.0, 10.0).is_none());
        assert!(f_upper_tail(f64::NAN, 1.0, 10.0).is_none());
    }
}
