//! Output artifacts.
//!
//! Every file is written to a temporary file in the output directory and then
//! renamed over the target, so a failed run never leaves a half-written file
//! and re-runs overwrite rather than append.
//!
//! - `simplified_logworth.csv`: response,term,estimate,log_worth,selected
//! - `response_summary.csv`: one line per declared response
//! - `model_<response>.json`: diagnostics of each fitted response
//! - `run_log.txt`: the console transcript

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::FitResult;
use crate::error::{DoeError, Result};
use crate::fit::ResponseOutcome;
use crate::significance::{ResponseSignificance, SignificanceTable};

pub const SIGNIFICANCE_FILE: &str = "simplified_logworth.csv";
pub const SUMMARY_FILE: &str = "response_summary.csv";
pub const RUN_LOG_FILE: &str = "run_log.txt";

/// Write `bytes` to `dir/name` atomically.
pub fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| DoeError::io_at("Failed to create temp file in", dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| DoeError::io_at("Failed to write", &path, e))?;
    tmp.persist(&path)
        .map_err(|e| DoeError::io_at("Failed to replace", &path, e.error))?;
    Ok(path)
}

/// The simplified significance table, in table order.
pub fn write_significance_csv(dir: &Path, table: &SignificanceTable) -> Result<PathBuf> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(["response", "term", "estimate", "log_worth", "selected"])
        .map_err(csv_error)?;
    for row in table.rows() {
        let estimate = format!("{:.6}", row.estimate);
        let log_worth = format!("{:.4}", row.log_worth);
        w.write_record([
            row.response.as_str(),
            row.term.as_str(),
            estimate.as_str(),
            log_worth.as_str(),
            if row.selected { "true" } else { "false" },
        ])
        .map_err(csv_error)?;
    }
    let bytes = w.into_inner().map_err(|e| csv_error(e.into_error().into()))?;
    write_atomic(dir, SIGNIFICANCE_FILE, &bytes)
}

/// One summary line per response; `outcomes` and `table.responses` are aligned.
pub fn write_summary_csv(dir: &Path, outcomes: &[ResponseOutcome], table: &SignificanceTable) -> Result<PathBuf> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record([
        "response",
        "status",
        "n_used",
        "n_excluded",
        "n_terms",
        "n_selected",
        "selected_terms",
        "message",
    ])
    .map_err(csv_error)?;

    for (outcome, sig) in outcomes.iter().zip(&table.responses) {
        let (n_used, n_excluded, message) = match outcome {
            ResponseOutcome::Fitted(fit) => (
                fit.quality.n_used,
                fit.quality.n_excluded,
                fit.notes.join("; "),
            ),
            ResponseOutcome::NonEstimable {
                n_used,
                n_excluded,
                reason,
                ..
            } => (*n_used, *n_excluded, reason.clone()),
            ResponseOutcome::Failed { error, .. } => (0, 0, error.to_string()),
        };
        w.write_record([
            sig.response.clone(),
            sig.status.label().to_string(),
            n_used.to_string(),
            n_excluded.to_string(),
            sig.rows.len().to_string(),
            sig.selected().count().to_string(),
            selected_terms(sig),
            message,
        ])
        .map_err(csv_error)?;
    }
    let bytes = w.into_inner().map_err(|e| csv_error(e.into_error().into()))?;
    write_atomic(dir, SUMMARY_FILE, &bytes)
}

fn selected_terms(sig: &ResponseSignificance) -> String {
    sig.selected().map(|r| r.term.as_str()).collect::<Vec<_>>().join(";")
}

/// Pretty JSON diagnostics for one fitted response.
pub fn write_model_json(dir: &Path, fit: &FitResult) -> Result<PathBuf> {
    let json = serde_json::to_vec_pretty(fit)
        .map_err(|e| DoeError::io("Failed to serialize model diagnostics", e.into()))?;
    write_atomic(dir, &model_file_name(&fit.response), &json)
}

/// `model_<response>.json` with anything outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn model_file_name(response: &str) -> String {
    let safe: String = response
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    format!("model_{safe}.json")
}

pub fn write_run_log(dir: &Path, text: &str) -> Result<PathBuf> {
    write_atomic(dir, RUN_LOG_FILE, text.as_bytes())
}

/// Sorted names of the regular files in `dir`.
pub fn list_output_files(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| DoeError::io_at("Failed to list", dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DoeError::io_at("Failed to list", dir, e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| DoeError::io_at("Failed to stat", &entry.path(), e))?
            .is_file();
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn csv_error(e: csv::Error) -> DoeError {
    DoeError::io("Failed to encode CSV", e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::significance::{ResponseStatus, SignificanceRow};

    fn table() -> SignificanceTable {
        SignificanceTable {
            threshold: 1.5,
            responses: vec![ResponseSignificance {
                response: "Lvalue".to_string(),
                status: ResponseStatus::Analyzed,
                message: None,
                rows: vec![
                    SignificanceRow {
                        response: "Lvalue".to_string(),
                        term: "Temp".to_string(),
                        estimate: 0.5,
                        p_value: 0.001,
                        log_worth: 3.0,
                        capped: false,
                        selected: true,
                    },
                    SignificanceRow {
                        response: "Lvalue".to_string(),
                        term: "Pigment, batch".to_string(),
                        estimate: -1.25,
                        p_value: 0.5,
                        log_worth: 0.30103,
                        capped: false,
                        selected: false,
                    },
                ],
            }],
        }
    }

    #[test]
    fn significance_csv_has_stable_header_and_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_significance_csv(dir.path(), &table()).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "response,term,estimate,log_worth,selected");
        assert_eq!(lines[1], "Lvalue,Temp,0.500000,3.0000,true");
        assert_eq!(lines[2], "Lvalue,\"Pigment, batch\",-1.250000,0.3010,false");
    }

    #[test]
    fn rewrite_overwrites_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        write_run_log(dir.path(), "first run\n").unwrap();
        write_run_log(dir.path(), "second\n").unwrap();
        let text = fs::read_to_string(dir.path().join(RUN_LOG_FILE)).unwrap();
        assert_eq!(text, "second\n");
        // No temp files left behind.
        assert_eq!(list_output_files(dir.path()).unwrap(), vec![RUN_LOG_FILE.to_string()]);
    }

    #[test]
    fn listing_is_sorted_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_atomic(dir.path(), "b.txt", b"b").unwrap();
        write_atomic(dir.path(), "a.txt", b"a").unwrap();
        assert_eq!(list_output_files(dir.path()).unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn model_file_names_are_filesystem_safe() {
        assert_eq!(model_file_name("Lvalue"), "model_Lvalue.json");
        assert_eq!(model_file_name("a*/b"), "model_a__b.json");
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(write_run_log(&missing, "x"), Err(DoeError::Io { .. })));
    }
}
