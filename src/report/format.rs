//! Formatted terminal output: run header, per-response effect summaries and
//! the final selection summary.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use chrono::{DateTime, Utc};

use crate::domain::{DoeConfig, ExperimentTable, FitResult, PredictorSelection, TermStatus};
use crate::significance::{ResponseSignificance, SignificanceTable};

/// Run parameters and dataset shape.
pub fn format_run_header(
    source: &str,
    table: &ExperimentTable,
    config: &DoeConfig,
    started: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    out.push_str("=== lab-doe - Mixed-Model DOE Analysis ===\n");
    out.push_str(&format!("Started: {}\n", started.format("%Y-%m-%d %H:%M:%S UTC")));
    out.push_str(&format!("Input: {source}\n"));
    out.push_str(&format!(
        "Rows: {} accepted of {} read ({} rejected)\n",
        table.n_rows(),
        table.rows_read(),
        table.row_errors().len()
    ));
    out.push_str(&format!("Responses: {}\n", config.response_columns.join(", ")));
    let predictors = match &config.predictors {
        PredictorSelection::All => "all".to_string(),
        PredictorSelection::Explicit(list) => list.join(", "),
    };
    out.push_str(&format!("Predictors: {predictors}\n"));
    out.push_str(&format!(
        "Random effects: {}\n",
        match (&config.group, config.random_slopes.is_empty()) {
            (None, _) => "none".to_string(),
            (Some(g), true) => format!("(1 | {g})"),
            (Some(g), false) => format!("(1 + {} | {g})", config.random_slopes.join(" + ")),
        }
    ));
    out.push_str(&format!(
        "Threshold: log-worth >= {} (p <= {:.4}) | interactions={} | force_full_dataset={}\n",
        config.threshold,
        10f64.powf(-config.threshold),
        config.interactions,
        config.force_full_dataset
    ));
    out
}

/// Effect summary for one fitted response.
pub fn format_fit_summary(fit: &FitResult, sig: &ResponseSignificance) -> String {
    let mut out = String::new();
    let q = &fit.quality;

    out.push_str(&format!("--- {} ---\n", fit.response));
    let groups = q.n_groups.map(|g| format!(", groups={g}")).unwrap_or_default();
    out.push_str(&format!(
        "Model: {}{groups} | n used={} excluded={} | rank={}\n",
        fit.random_structure.display_name(),
        q.n_used,
        q.n_excluded,
        q.rank
    ));
    out.push_str(&format!(
        "REML deviance={:.3} AIC={:.3} BIC={:.3} | intercept={:.4}\n",
        q.reml_deviance, q.aic, q.bic, fit.intercept
    ));

    out.push_str(&format_effect_table(sig));

    let aliased: Vec<&str> = fit
        .terms
        .iter()
        .filter(|t| t.status == TermStatus::NonEstimable)
        .map(|t| t.term.as_str())
        .collect();
    if !aliased.is_empty() {
        out.push_str(&format!("Non-estimable (aliased): {}\n", aliased.join(", ")));
    }
    for s in &fit.skipped {
        out.push_str(&format!("Skipped: {} ({})\n", s.term, s.reason.label()));
    }

    let v = &fit.variance;
    let mut parts = vec![format!("residual={:.4}", v.residual)];
    if let Some(g) = v.group_intercept {
        parts.push(format!("group intercept={g:.4}"));
    }
    for s in &v.slopes {
        parts.push(format!("slope[{}]={:.4}", s.predictor, s.variance));
    }
    out.push_str(&format!("Variance components: {}\n", parts.join(", ")));
    out
}

fn format_effect_table(sig: &ResponseSignificance) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<24} {:>12} {:>10} {:>10} {:<3}\n",
            "term", "estimate", "log_worth", "p", "sel"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<24} {:-<12} {:-<10} {:-<10} {:-<3}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for r in &sig.rows {
        let lw = if r.capped {
            format!(">{:.2}", r.log_worth)
        } else {
            format!("{:.3}", r.log_worth)
        };
        out.push_str(
            format!(
                "{:<24} {:>12.4} {:>10} {:>10} {:<3}\n",
                truncate(&r.term, 24),
                r.estimate,
                lw,
                fmt_p(r.p_value),
                if r.selected { "*" } else { "" },
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Selected terms per response.
pub fn format_selection_summary(table: &SignificanceTable) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Selected terms (log-worth >= {}):\n",
        table.threshold
    ));
    for r in &table.responses {
        let selected: Vec<&str> = r.selected().map(|row| row.term.as_str()).collect();
        let listed = if selected.is_empty() {
            "(none)".to_string()
        } else {
            selected.join(", ")
        };
        out.push_str(&format!("  {:<12} [{}] {listed}", r.response, r.status.label()));
        let rest: Vec<&str> = r.not_selected().map(|row| row.term.as_str()).collect();
        if !rest.is_empty() {
            out.push_str(&format!("  (not selected: {})", rest.join(", ")));
        }
        out.push('\n');
    }
    out
}

fn fmt_p(p: f64) -> String {
    if p < 1e-4 {
        format!("{p:.2e}")
    } else {
        format!("{p:.4}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
