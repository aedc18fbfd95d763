//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - compared across runs (identical inputs must give identical outputs)

use serde::{Deserialize, Serialize};

/// A single CSV cell after numeric coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Parse a trimmed raw cell. Empty strings are missing values.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return Cell::Missing;
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Number(v),
            _ => Cell::Text(s.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Level label used when the cell is treated as a categorical value.
    pub fn level_label(&self) -> Option<String> {
        match self {
            Cell::Number(v) => Some(format!("{v}")),
            Cell::Text(s) => Some(s.clone()),
            Cell::Missing => None,
        }
    }
}

/// How a predictor column enters the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Continuous,
    Categorical,
}

/// One named column of the experiment table.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// `true` when every non-missing cell parsed as a number.
    pub fn is_numeric(&self) -> bool {
        self.cells.iter().all(|c| !matches!(c, Cell::Text(_)))
    }

    /// First non-numeric cell as `(row_index, raw_text)`.
    pub fn first_text(&self) -> Option<(usize, &str)> {
        self.cells.iter().enumerate().find_map(|(i, c)| match c {
            Cell::Text(s) => Some((i, s.as_str())),
            _ => None,
        })
    }
}

/// A row-level problem encountered while reading the CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based line number in the source file (header is line 1).
    pub line: usize,
    pub message: String,
}

/// The loaded experiment: ordered columns with one cell per accepted row.
///
/// Built once by the loader and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ExperimentTable {
    columns: Vec<Column>,
    /// Source line of each accepted row.
    lines: Vec<usize>,
    n_rows: usize,
    rows_read: usize,
    row_errors: Vec<RowError>,
    /// Loader remarks about ignored header columns.
    notes: Vec<String>,
}

impl ExperimentTable {
    /// All columns must have one cell per entry of `lines`.
    pub(crate) fn new(
        columns: Vec<Column>,
        lines: Vec<usize>,
        rows_read: usize,
        row_errors: Vec<RowError>,
    ) -> Self {
        let n_rows = lines.len();
        debug_assert!(columns.iter().all(|c| c.cells.len() == n_rows));
        Self {
            columns,
            lines,
            n_rows,
            rows_read,
            row_errors,
            notes: Vec::new(),
        }
    }

    pub(crate) fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn row_errors(&self) -> &[RowError] {
        &self.row_errors
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Source line (1-based, header = 1) of an accepted row.
    pub fn line(&self, row: usize) -> usize {
        self.lines.get(row).copied().unwrap_or(row + 2)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Resolve how a column is encoded: numeric columns are continuous unless
    /// explicitly listed in `categorical`.
    pub fn column_kind(&self, name: &str, categorical: &[String]) -> Option<ColumnKind> {
        let col = self.column(name)?;
        if categorical.iter().any(|c| c == name) || !col.is_numeric() {
            Some(ColumnKind::Categorical)
        } else {
            Some(ColumnKind::Continuous)
        }
    }
}

/// Fixed/random-effects specification for a single response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub response: String,
    /// Candidate fixed-effect predictors, in declaration order.
    pub predictors: Vec<String>,
    /// Grouping column for the random intercept.
    pub group: Option<String>,
    /// Continuous predictors that also get an independent per-group slope.
    pub random_slopes: Vec<String>,
    /// Include all two-way interactions between estimable predictors.
    pub interactions: bool,
    /// Columns forced to categorical encoding.
    pub categorical: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermStatus {
    Estimated,
    NonEstimable,
}

/// Test results for one fixed-effect term.
///
/// Categorical terms span several design columns; `estimate` is then the
/// level contrast (vs. the reference level) with the largest magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermResult {
    pub term: String,
    /// Number of design columns estimated for this term.
    pub columns: usize,
    pub estimate: Option<f64>,
    pub std_error: Option<f64>,
    /// Wald F statistic (equals t² for single-column terms).
    pub statistic: Option<f64>,
    pub df_num: usize,
    pub df_den: Option<f64>,
    pub p_value: Option<f64>,
    pub status: TermStatus,
}

impl TermResult {
    pub fn non_estimable(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            columns: 0,
            estimate: None,
            std_error: None,
            statistic: None,
            df_num: 0,
            df_den: None,
            p_value: None,
            status: TermStatus::NonEstimable,
        }
    }
}

/// Why a candidate predictor never entered the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Constant over the rows used (zero variance / a single level).
    SkippedConstant,
    /// Categorical with a distinct level on every row (an identifier).
    SkippedUniqueLevels,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::SkippedConstant => "skipped_constant",
            SkipReason::SkippedUniqueLevels => "skipped_unique_levels",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTerm {
    pub term: String,
    pub reason: SkipReason,
}

/// Random-effects structure actually used for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomStructure {
    None,
    Intercept,
    InterceptSlopes,
}

impl RandomStructure {
    pub fn display_name(self) -> &'static str {
        match self {
            RandomStructure::None => "fixed effects only",
            RandomStructure::Intercept => "random intercept",
            RandomStructure::InterceptSlopes => "random intercept + slopes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlopeVariance {
    pub predictor: String,
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceComponents {
    pub residual: f64,
    pub group_intercept: Option<f64>,
    pub slopes: Vec<SlopeVariance>,
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    /// `-2 * REML log-likelihood` at the optimum.
    pub reml_deviance: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_used: usize,
    pub n_excluded: usize,
    pub n_groups: Option<usize>,
    /// Rank of the fixed-effects design actually estimated.
    pub rank: usize,
}

/// Fit output for a single response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub response: String,
    /// Fixed intercept (baseline at reference levels); not part of `terms`.
    pub intercept: f64,
    pub terms: Vec<TermResult>,
    pub skipped: Vec<SkippedTerm>,
    /// Design columns removed because they were aliased with earlier ones.
    pub dropped_columns: Vec<String>,
    pub variance: VarianceComponents,
    pub random_structure: RandomStructure,
    pub converged: bool,
    pub quality: FitQuality,
    pub notes: Vec<String>,
}

impl FitResult {
    pub fn estimated_terms(&self) -> impl Iterator<Item = &TermResult> {
        self.terms
            .iter()
            .filter(|t| t.status == TermStatus::Estimated)
    }
}
