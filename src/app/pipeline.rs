//! The analysis pipeline shared by the CLI and library callers.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load -> fit every response -> reduce to log-worth -> write artifacts
//!
//! Whole-run failures (invalid config, unreadable or empty input, unwritable
//! output directory) are returned as errors before or instead of any output.
//! Per-response failures are part of the returned `DoeRun`.

use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::domain::DoeConfig;
use crate::error::{DoeError, Result};
use crate::fit::{fit_responses, ResponseOutcome};
use crate::io::{
    list_output_files, load_table, mixed_type_notes, write_model_json, write_run_log, write_significance_csv,
    write_summary_csv, CsvSource, SIGNIFICANCE_FILE, SUMMARY_FILE,
};
use crate::report::{format_fit_summary, format_run_header, format_selection_summary, RunReport};
use crate::significance::{reduce, SignificanceTable};

/// All outputs of a single run.
#[derive(Debug)]
pub struct DoeRun {
    /// The transcript, identical to `run_log.txt`.
    pub console_text: String,
    /// Regular files in the output directory after the run, sorted.
    pub files_written: Vec<String>,
    pub significance: SignificanceTable,
    pub outcomes: Vec<ResponseOutcome>,
}

/// Analyse the CSV at `file_path` and write artifacts to `output_dir`.
pub fn run_doe(file_path: &Path, output_dir: &Path, config: &DoeConfig) -> Result<DoeRun> {
    run_doe_source(&CsvSource::Path(file_path.to_path_buf()), output_dir, config)
}

/// Same as [`run_doe`] for any input source (e.g. an inline payload).
pub fn run_doe_source(source: &CsvSource, output_dir: &Path, config: &DoeConfig) -> Result<DoeRun> {
    config.validate()?;
    let started = Utc::now();

    // 1) Load + validate. Schema errors abort before anything is written.
    let table = load_table(source, config)?;
    fs::create_dir_all(output_dir)
        .map_err(|e| DoeError::io_at("Failed to create output directory", output_dir, e))?;

    let mut report = RunReport::new();
    report.block(&format_run_header(&source.describe(), &table, config, started));
    for note in table.notes() {
        report.warn(note.clone());
    }
    for e in table.row_errors() {
        report.warn(format!("line {}: row rejected: {}", e.line, e.message));
    }
    let predictors = config.resolve_predictors(&table);
    for note in mixed_type_notes(&table, &predictors, &config.categorical) {
        report.warn(note);
    }

    // 2) Fit every response.
    let specs = config.model_specs(&table);
    info!(responses = specs.len(), rows = table.n_rows(), "fitting responses");
    let outcomes = fit_responses(&table, &specs, config);

    // 3) Reduce to the significance table.
    let significance = reduce(&outcomes, config.threshold);

    for (outcome, sig) in outcomes.iter().zip(&significance.responses) {
        match outcome {
            ResponseOutcome::Fitted(fit) => {
                report.block(&format_fit_summary(fit, sig));
                if fit.quality.n_excluded > 0 {
                    report.warn(format!(
                        "{}: {} row(s) excluded (missing values)",
                        fit.response, fit.quality.n_excluded
                    ));
                }
                for s in &fit.skipped {
                    report.warn(format!("{}: term `{}` {}", fit.response, s.term, s.reason.label()));
                }
                for note in &fit.notes {
                    report.warn(format!("{}: {note}", fit.response));
                }
            }
            ResponseOutcome::NonEstimable {
                response,
                reason,
                notes,
                n_excluded,
                ..
            } => {
                for note in notes {
                    report.warn(format!("{response}: {note}"));
                }
                if *n_excluded > 0 {
                    report.warn(format!("{response}: {n_excluded} row(s) excluded (missing values)"));
                }
                report.error(format!("{response}: non-estimable: {reason}"));
            }
            ResponseOutcome::Failed { response, error } => {
                report.error(format!("{response}: {error}"));
            }
        }
    }
    report.block(&format_selection_summary(&significance));

    // 4) Artifacts.
    write_significance_csv(output_dir, &significance)?;
    write_summary_csv(output_dir, &outcomes, &significance)?;
    let mut models = 0;
    for fit in outcomes.iter().filter_map(ResponseOutcome::fit) {
        write_model_json(output_dir, fit)?;
        models += 1;
    }
    report.info(format!(
        "Wrote {SIGNIFICANCE_FILE}, {SUMMARY_FILE} and {models} model file(s) to {}",
        output_dir.display()
    ));

    let console_text = report.console_text();
    write_run_log(output_dir, &console_text)?;
    report.set_files(list_output_files(output_dir)?);

    Ok(DoeRun {
        console_text,
        files_written: report.files().to_vec(),
        significance,
        outcomes,
    })
}
