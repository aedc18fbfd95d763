//! CSV ingest and validation.
//!
//! This module is responsible for turning an experiment CSV into an immutable
//! `ExperimentTable` and for the per-response checks that happen before fitting.
//!
//! Design goals:
//! - **Strict schema** for declared columns (case-sensitive names, clear errors)
//! - **Row-level validation** (exclude incomplete rows, but report how many)
//! - **Deterministic behavior** (no hidden randomness)
//! - **Separation of concerns**: no fitting logic here

use std::collections::HashMap;

use csv::StringRecord;
use tracing::debug;

use crate::domain::{Cell, Column, DoeConfig, ExperimentTable, ModelSpec, RowError};
use crate::error::{DoeError, Result};
use crate::io::source::CsvSource;

/// Rows of the table a response will be fitted on.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSelection {
    /// Row indices (into the table) in file order.
    pub rows: Vec<usize>,
    /// Response value for each selected row.
    pub y: Vec<f64>,
    /// Rows skipped because the response or a model column was empty.
    pub excluded: usize,
}

/// Load a CSV into an `ExperimentTable` and check every declared column exists.
pub fn load_table(source: &CsvSource, config: &DoeConfig) -> Result<ExperimentTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source.reader()?);

    let headers = reader
        .headers()
        .map_err(|e| DoeError::schema(format!("Failed to read CSV header row: {e}")))?
        .clone();

    let (names, notes) = normalize_headers(&headers, &declared_names(config))?;
    let width = names.len();
    let kept: Vec<usize> = (0..width).filter(|&i| names[i].is_some()).collect();

    let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); kept.len()];
    let mut lines = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2 because:
        // - records() starts at line 1 after headers
        // - CSV is 1-based line numbers
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        if record.len() > width {
            row_errors.push(RowError {
                line,
                message: format!("expected {width} fields, found {}", record.len()),
            });
            continue;
        }

        // Short rows leave trailing cells missing.
        for (out, &col) in cells.iter_mut().zip(&kept) {
            out.push(record.get(col).map(Cell::parse).unwrap_or(Cell::Missing));
        }
        lines.push(line);
    }

    if lines.is_empty() {
        return Err(DoeError::schema(
            "insufficient data: the file has a header row but no usable data rows",
        ));
    }

    let columns = names
        .into_iter()
        .flatten()
        .zip(cells)
        .map(|(name, cells)| Column::new(name, cells))
        .collect();
    let table = ExperimentTable::new(columns, lines, rows_read, row_errors).with_notes(notes);

    ensure_declared_columns_exist(&table, config)?;
    debug!(
        rows = table.n_rows(),
        rows_read = table.rows_read(),
        rejected = table.row_errors().len(),
        "loaded experiment table"
    );
    Ok(table)
}

/// Column names in file order; `None` marks a column that is ignored.
///
/// Blank headers are ignored. A repeated name is a schema error when the
/// configuration refers to it; otherwise every copy is ignored.
fn normalize_headers(headers: &StringRecord, declared: &[&str]) -> Result<(Vec<Option<String>>, Vec<String>)> {
    let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for n in names.iter().filter(|n| !n.is_empty()) {
        *counts.entry(n.as_str()).or_default() += 1;
    }

    let mut notes = Vec::new();
    let mut out = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        if name.is_empty() {
            notes.push(format!("column {} has an empty header and is ignored", idx + 1));
            out.push(None);
            continue;
        }
        if counts.get(name.as_str()).copied().unwrap_or(0) > 1 {
            if declared.contains(&name.as_str()) {
                return Err(DoeError::schema(format!("Duplicate column name: `{name}`")));
            }
            notes.push(format!("duplicate column `{name}` at position {} is ignored", idx + 1));
            out.push(None);
            continue;
        }
        out.push(Some(name.clone()));
    }
    if out.iter().all(Option::is_none) {
        return Err(DoeError::schema("CSV has no header row"));
    }
    Ok((out, notes))
}

/// Every column name the configuration refers to explicitly.
fn declared_names(config: &DoeConfig) -> Vec<&str> {
    let mut names: Vec<&str> = config.response_columns.iter().map(String::as_str).collect();
    if let crate::domain::PredictorSelection::Explicit(list) = &config.predictors {
        names.extend(list.iter().map(String::as_str));
    }
    names.extend(config.group.as_deref());
    names.extend(config.random_slopes.iter().map(String::as_str));
    names.extend(config.categorical.iter().map(String::as_str));
    names
}

fn normalize_header_name(name: &str) -> String {
    // Excel and other tools sometimes emit UTF-8 CSVs with a BOM prefix on the
    // first header. If we don't strip it, schema validation will incorrectly
    // report missing columns. Names stay case-sensitive.
    name.trim().trim_start_matches('\u{feff}').trim().to_string()
}

fn ensure_declared_columns_exist(table: &ExperimentTable, config: &DoeConfig) -> Result<()> {
    let require = |name: &str, role: &str| -> Result<()> {
        if table.has_column(name) {
            Ok(())
        } else {
            Err(DoeError::schema(format!("Missing {role} column: `{name}`")))
        }
    };

    for r in &config.response_columns {
        require(r, "response")?;
    }
    if let crate::domain::PredictorSelection::Explicit(list) = &config.predictors {
        for p in list {
            require(p, "predictor")?;
        }
    }
    if let Some(group) = &config.group {
        require(group, "grouping")?;
    }
    for s in &config.random_slopes {
        require(s, "random-slope")?;
    }
    for c in &config.categorical {
        require(c, "categorical")?;
    }
    Ok(())
}

/// Coerce a response column to numbers.
///
/// Empty cells become `None` (the row is excluded later and counted);
/// any non-empty non-numeric cell is a `TypeError` for the whole response.
pub fn coerce_response(table: &ExperimentTable, response: &str) -> Result<Vec<Option<f64>>> {
    let col = table
        .column(response)
        .ok_or_else(|| DoeError::schema(format!("Missing response column: `{response}`")))?;

    if let Some((row, value)) = col.first_text() {
        return Err(DoeError::Type {
            row: table.line(row),
            column: response.to_string(),
            value: value.to_string(),
        });
    }
    Ok(col.cells().iter().map(Cell::as_f64).collect())
}

/// Warnings for predictors that are mostly numeric but hold some text, and
/// are therefore encoded as categorical.
pub fn mixed_type_notes(table: &ExperimentTable, predictors: &[String], categorical: &[String]) -> Vec<String> {
    let mut notes = Vec::new();
    for (i, name) in predictors.iter().enumerate() {
        if predictors[..i].contains(name) || categorical.contains(name) {
            continue;
        }
        let Some(col) = table.column(name) else { continue };
        let Some((row, value)) = col.first_text() else { continue };
        let numbers = col.cells().iter().filter(|c| matches!(c, Cell::Number(_))).count();
        let texts = col.cells().iter().filter(|c| matches!(c, Cell::Text(_))).count();
        if numbers > texts {
            notes.push(format!(
                "predictor `{name}` is mostly numeric but has {texts} text value(s) (first '{value}' on line {}); encoded as categorical",
                table.line(row)
            ));
        }
    }
    notes
}

/// Pick the rows a response is fitted on.
///
/// A row is used when the response value and every model column (predictors,
/// grouping column, slope columns) are present. `restrict_to`, when given,
/// further limits rows to a common subset shared by several responses.
pub fn select_rows(
    table: &ExperimentTable,
    spec: &ModelSpec,
    response: &[Option<f64>],
    restrict_to: Option<&[bool]>,
) -> RowSelection {
    let model_columns: Vec<&Column> = model_columns(spec)
        .filter_map(|name| table.column(name))
        .collect();

    let mut rows = Vec::new();
    let mut y = Vec::new();
    let mut excluded = 0usize;

    for (row, value) in response.iter().enumerate() {
        if let Some(mask) = restrict_to {
            if !mask.get(row).copied().unwrap_or(false) {
                excluded += 1;
                continue;
            }
        }
        let complete = model_columns.iter().all(|c| !c.cells()[row].is_missing());
        match value {
            Some(v) if complete => {
                rows.push(row);
                y.push(*v);
            }
            _ => excluded += 1,
        }
    }

    RowSelection { rows, y, excluded }
}

/// Mask of rows complete for every given response and model column.
///
/// Used when `force_full_dataset` is off: all responses are then analysed on
/// the same rows.
pub fn common_rows(table: &ExperimentTable, specs: &[&ModelSpec], responses: &[&[Option<f64>]]) -> Vec<bool> {
    let mut mask = vec![true; table.n_rows()];
    for (spec, values) in specs.iter().zip(responses) {
        let sel = select_rows(table, spec, values, None);
        let mut keep = vec![false; table.n_rows()];
        for r in sel.rows {
            keep[r] = true;
        }
        for (m, k) in mask.iter_mut().zip(keep) {
            *m = *m && k;
        }
    }
    mask
}

fn model_columns(spec: &ModelSpec) -> impl Iterator<Item = &str> {
    spec.predictors
        .iter()
        .map(String::as_str)
        .chain(spec.group.as_deref())
        .chain(spec.random_slopes.iter().map(String::as_str))
}
