//! Significance reduction: p-values to log-worth and threshold selection.
//!
//! - `log_worth(p) = -log10(p)`, capped at [`MAX_LOG_WORTH`]
//! - a term is selected when `p ≤ 10^(-θ)`, compared on the p-value itself so
//!   capping never changes selection
//! - rows within a response are sorted by log-worth, descending and stable

use serde::Serialize;

use crate::domain::FitResult;
use crate::fit::ResponseOutcome;

/// Log-worth reported for p-values at or below `10^-300` (including 0).
pub const MAX_LOG_WORTH: f64 = 300.0;

/// `(log_worth, capped)` for a p-value in `[0, 1]`.
pub fn log_worth(p: f64) -> (f64, bool) {
    let raw = raw_log_worth(p);
    if raw >= MAX_LOG_WORTH {
        (MAX_LOG_WORTH, true)
    } else {
        (raw, false)
    }
}

fn raw_log_worth(p: f64) -> f64 {
    if !(p > 0.0) {
        return f64::INFINITY;
    }
    // Guards against p slightly above 1 from numerical noise.
    (-p.min(1.0).log10()).max(0.0)
}

/// `p ≤ 10^(-θ)`.
pub fn is_selected(p: f64, threshold: f64) -> bool {
    p <= 10f64.powf(-threshold)
}

/// One analysed term of one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceRow {
    pub response: String,
    pub term: String,
    pub estimate: f64,
    pub p_value: f64,
    pub log_worth: f64,
    pub capped: bool,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Analyzed,
    NonEstimable,
    Failed,
}

impl ResponseStatus {
    pub fn label(self) -> &'static str {
        match self {
            ResponseStatus::Analyzed => "analyzed",
            ResponseStatus::NonEstimable => "non_estimable",
            ResponseStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSignificance {
    pub response: String,
    pub status: ResponseStatus,
    /// Failure reason for non-analysed responses.
    pub message: Option<String>,
    pub rows: Vec<SignificanceRow>,
}

impl ResponseSignificance {
    pub fn selected(&self) -> impl Iterator<Item = &SignificanceRow> {
        self.rows.iter().filter(|r| r.selected)
    }

    pub fn not_selected(&self) -> impl Iterator<Item = &SignificanceRow> {
        self.rows.iter().filter(|r| !r.selected)
    }
}

/// All responses of a run, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceTable {
    pub threshold: f64,
    pub responses: Vec<ResponseSignificance>,
}

impl SignificanceTable {
    /// Every row, response by response.
    pub fn rows(&self) -> impl Iterator<Item = &SignificanceRow> {
        self.responses.iter().flat_map(|r| r.rows.iter())
    }
}

/// Reduce fit outcomes to the significance table.
pub fn reduce(outcomes: &[ResponseOutcome], threshold: f64) -> SignificanceTable {
    let responses = outcomes
        .iter()
        .map(|outcome| match outcome {
            ResponseOutcome::Fitted(fit) => ResponseSignificance {
                response: fit.response.clone(),
                status: ResponseStatus::Analyzed,
                message: None,
                rows: significance_rows(fit, threshold),
            },
            ResponseOutcome::NonEstimable { response, reason, .. } => ResponseSignificance {
                response: response.clone(),
                status: ResponseStatus::NonEstimable,
                message: Some(reason.clone()),
                rows: Vec::new(),
            },
            ResponseOutcome::Failed { response, error } => ResponseSignificance {
                response: response.clone(),
                status: ResponseStatus::Failed,
                message: Some(error.to_string()),
                rows: Vec::new(),
            },
        })
        .collect();

    SignificanceTable { threshold, responses }
}

/// Rows for the estimated terms of one fit, most significant first.
pub fn significance_rows(fit: &FitResult, threshold: f64) -> Vec<SignificanceRow> {
    let mut rows: Vec<SignificanceRow> = fit
        .estimated_terms()
        .filter_map(|t| {
            let p = t.p_value?;
            let (lw, capped) = log_worth(p);
            Some(SignificanceRow {
                response: fit.response.clone(),
                term: t.term.clone(),
                estimate: t.estimate.unwrap_or(0.0),
                p_value: p,
                log_worth: lw,
                capped,
                selected: is_selected(p, threshold),
            })
        })
        .collect();
    // `sort_by` is stable: equal log-worth keeps declaration order.
    rows.sort_by(|a, b| b.log_worth.total_cmp(&a.log_worth));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitQuality, RandomStructure, TermResult, TermStatus, VarianceComponents};
    use crate::error::DoeError;

    fn term(name: &str, p: Option<f64>) -> TermResult {
        TermResult {
            term: name.to_string(),
            columns: 1,
            estimate: Some(1.0),
            std_error: Some(0.1),
            statistic: Some(1.0),
            df_num: 1,
            df_den: Some(10.0),
            p_value: p,
            status: TermStatus::Estimated,
        }
    }

    fn fit(terms: Vec<TermResult>) -> FitResult {
        FitResult {
            response: "Lvalue".to_string(),
            intercept: 50.0,
            terms,
            skipped: Vec::new(),
            dropped_columns: Vec::new(),
            variance: VarianceComponents {
                residual: 1.0,
                group_intercept: None,
                slopes: Vec::new(),
            },
            random_structure: RandomStructure::None,
            converged: true,
            quality: FitQuality {
                reml_deviance: 10.0,
                aic: 16.0,
                bic: 17.0,
                n_used: 12,
                n_excluded: 0,
                n_groups: None,
                rank: 2,
            },
            notes: Vec::new(),
        }
    }

    #[test]
    fn log_worth_edges() {
        assert_eq!(log_worth(1.0), (0.0, false));
        assert!((log_worth(0.01).0 - 2.0).abs() < 1e-12);
        assert_eq!(log_worth(0.0), (MAX_LOG_WORTH, true));
        assert_eq!(log_worth(1e-320), (MAX_LOG_WORTH, true));
        let (lw, capped) = log_worth(1e-299);
        assert!(!capped && lw.is_finite());
    }

    #[test]
    fn selection_boundary_is_inclusive() {
        assert!(is_selected(10f64.powf(-1.5), 1.5));
        assert!(!is_selected(0.04, 1.5));
        assert!(is_selected(0.03, 1.5));
        assert!(is_selected(1.0, 0.0));
    }

    #[test]
    fn selection_is_monotone_in_threshold() {
        let f = fit(vec![
            term("A", Some(0.2)),
            term("B", Some(0.01)),
            term("C", Some(1e-8)),
            term("D", Some(0.0)),
        ]);
        let mut previous = usize::MAX;
        for step in 0..40 {
            let theta = step as f64 * 0.5;
            let n = significance_rows(&f, theta).iter().filter(|r| r.selected).count();
            assert!(n <= previous, "θ={theta}: {n} > {previous}");
            previous = n;
        }
    }

    #[test]
    fn rows_sorted_by_log_worth_with_stable_ties() {
        let mut skipped = term("X", None);
        skipped.status = TermStatus::NonEstimable;
        let rows = significance_rows(
            &fit(vec![
                term("A", Some(0.5)),
                term("B", Some(0.001)),
                skipped,
                term("C", Some(0.5)),
            ]),
            1.5,
        );
        let order: Vec<&str> = rows.iter().map(|r| r.term.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert!(rows[0].selected && !rows[1].selected);
    }

    #[test]
    fn every_response_is_represented() {
        let outcomes = vec![
            ResponseOutcome::Fitted(fit(vec![term("A", Some(0.01))])),
            ResponseOutcome::Failed {
                response: "Avalue".to_string(),
                error: DoeError::Type {
                    row: 3,
                    column: "Avalue".to_string(),
                    value: "N/A".to_string(),
                },
            },
            ResponseOutcome::NonEstimable {
                response: "Bvalue".to_string(),
                reason: "residual variance is zero (perfect fit)".to_string(),
                notes: Vec::new(),
                n_used: 4,
                n_excluded: 0,
            },
        ];
        let table = reduce(&outcomes, 1.5);
        let statuses: Vec<ResponseStatus> = table.responses.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ResponseStatus::Analyzed, ResponseStatus::Failed, ResponseStatus::NonEstimable]
        );
        assert_eq!(table.rows().count(), 1);
        assert!(table.responses[1].message.as_deref().unwrap().contains("N/A"));
    }
}
