//! Run configuration.
//!
//! A `DoeConfig` can be built three ways, in increasing precedence:
//!
//! - `DoeConfig::default()` (responses `Lvalue,Avalue,Bvalue`, θ = 1.5)
//! - a JSON file (`DoeConfig::from_json_file`), missing keys fall back to defaults
//! - CLI flags / environment variables applied by `app`

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ExperimentTable, ModelSpec};
use crate::error::{DoeError, Result};

/// Default L*a*b response columns.
pub const DEFAULT_RESPONSES: [&str; 3] = ["Lvalue", "Avalue", "Bvalue"];

/// Default log-worth threshold (p ≤ 10^-1.5 ≈ 0.0316).
pub const DEFAULT_THRESHOLD: f64 = 1.5;

/// Which columns enter the model as fixed effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PredictorRepr", into = "PredictorRepr")]
pub enum PredictorSelection {
    /// Every column that is not a response or the grouping column.
    All,
    Explicit(Vec<String>),
}

impl PredictorSelection {
    /// Parse the `"all"` keyword or a comma-separated column list.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return PredictorSelection::All;
        }
        PredictorSelection::Explicit(parse_list(trimmed))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PredictorRepr {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<PredictorRepr> for PredictorSelection {
    type Error = String;

    fn try_from(value: PredictorRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            PredictorRepr::Keyword(s) if s.eq_ignore_ascii_case("all") => Ok(PredictorSelection::All),
            PredictorRepr::Keyword(s) => Err(format!(
                "predictors must be \"all\" or a list of column names, got \"{s}\""
            )),
            PredictorRepr::List(v) => Ok(PredictorSelection::Explicit(v)),
        }
    }
}

impl From<PredictorSelection> for PredictorRepr {
    fn from(value: PredictorSelection) -> Self {
        match value {
            PredictorSelection::All => PredictorRepr::Keyword("all".to_string()),
            PredictorSelection::Explicit(v) => PredictorRepr::List(v),
        }
    }
}

/// Upper bound on variance-ratio grid points evaluated per fit.
pub const MAX_GRID_POINTS: usize = 20_000;

/// Variance-ratio search settings for the REML optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Smallest non-zero relative standard deviation on the grid.
    pub ratio_min: f64,
    /// Largest relative standard deviation; an optimum here counts as divergence.
    pub ratio_max: f64,
    /// Grid points per dimension when only a random intercept is fitted.
    pub steps_intercept: usize,
    /// Grid points per dimension when random slopes are present.
    pub steps_slopes: usize,
    /// Maximum coordinate sweeps of the golden-section refinement.
    pub refine_sweeps: usize,
    /// Relative objective change that ends refinement.
    pub tolerance: f64,
}

impl GridSettings {
    /// Grid size for a random intercept plus `slopes` slopes, `None` on overflow.
    pub fn points(&self, slopes: usize) -> Option<usize> {
        let steps = if slopes == 0 { self.steps_intercept } else { self.steps_slopes };
        let dims = u32::try_from(slopes + 1).ok()?;
        steps.checked_add(1)?.checked_pow(dims)
    }
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            ratio_min: 1e-3,
            ratio_max: 1e3,
            steps_intercept: 25,
            steps_slopes: 9,
            refine_sweeps: 40,
            tolerance: 1e-9,
        }
    }
}

/// A full run's configuration as understood by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoeConfig {
    pub response_columns: Vec<String>,
    pub predictors: PredictorSelection,
    /// Log-worth cutoff θ: a term is selected when p ≤ 10^(-θ).
    pub threshold: f64,
    /// Use every row available per response instead of the rows complete for
    /// all responses.
    pub force_full_dataset: bool,
    pub group: Option<String>,
    pub random_slopes: Vec<String>,
    pub interactions: bool,
    pub categorical: Vec<String>,
    /// Fit responses on the rayon pool.
    pub parallel: bool,
    pub grid: GridSettings,
}

impl Default for DoeConfig {
    fn default() -> Self {
        Self {
            response_columns: DEFAULT_RESPONSES.iter().map(|s| s.to_string()).collect(),
            predictors: PredictorSelection::All,
            threshold: DEFAULT_THRESHOLD,
            force_full_dataset: true,
            group: None,
            random_slopes: Vec::new(),
            interactions: false,
            categorical: Vec::new(),
            parallel: true,
            grid: GridSettings::default(),
        }
    }
}

impl DoeConfig {
    /// Read a JSON config file. Keys not present keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DoeError::io_at("Failed to open config", path, e))?;
        let config: DoeConfig = serde_json::from_reader(file)
            .map_err(|e| DoeError::Config(format!("'{}': {e}", path.display())))?;
        Ok(config)
    }

    /// Check settings that do not depend on the data.
    pub fn validate(&self) -> Result<()> {
        if self.response_columns.is_empty() {
            return Err(DoeError::Config("at least one response column is required".to_string()));
        }
        for (i, r) in self.response_columns.iter().enumerate() {
            if r.trim().is_empty() {
                return Err(DoeError::Config("response column names must not be empty".to_string()));
            }
            if self.response_columns[..i].contains(r) {
                return Err(DoeError::Config(format!("response column `{r}` listed twice")));
            }
        }
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(DoeError::Config(format!(
                "threshold must be finite and >= 0, got {}",
                self.threshold
            )));
        }
        if let PredictorSelection::Explicit(list) = &self.predictors {
            if let Some(p) = list.iter().find(|p| self.response_columns.contains(p)) {
                return Err(DoeError::Config(format!("`{p}` is both a response and a predictor")));
            }
        }
        if let Some(group) = &self.group {
            if self.response_columns.contains(group) {
                return Err(DoeError::Config(format!("`{group}` is both a response and the grouping column")));
            }
            if let PredictorSelection::Explicit(list) = &self.predictors {
                if list.contains(group) {
                    return Err(DoeError::Config(format!("`{group}` is both a predictor and the grouping column")));
                }
            }
        }
        if !self.random_slopes.is_empty() && self.group.is_none() {
            return Err(DoeError::Config("random slopes require a grouping column".to_string()));
        }
        let g = &self.grid;
        if !(g.ratio_min.is_finite() && g.ratio_max.is_finite() && g.ratio_min > 0.0 && g.ratio_max > g.ratio_min) {
            return Err(DoeError::Config(format!(
                "invalid variance-ratio range: min={}, max={}",
                g.ratio_min, g.ratio_max
            )));
        }
        if g.steps_intercept < 2 || g.steps_slopes < 2 {
            return Err(DoeError::Config("variance-ratio grid needs >= 2 steps".to_string()));
        }
        match g.points(self.random_slopes.len()) {
            Some(n) if n <= MAX_GRID_POINTS => {}
            _ => {
                return Err(DoeError::Config(format!(
                    "{} random slope(s) need more than {MAX_GRID_POINTS} variance-ratio grid points; \
                     use fewer slopes or a smaller steps_slopes",
                    self.random_slopes.len()
                )));
            }
        }
        if !(g.tolerance.is_finite() && g.tolerance > 0.0) {
            return Err(DoeError::Config("refinement tolerance must be > 0".to_string()));
        }
        Ok(())
    }

    /// Resolve the fixed-effect predictor list against a loaded table.
    ///
    /// `All` keeps header order and excludes responses and the grouping column.
    pub fn resolve_predictors(&self, table: &ExperimentTable) -> Vec<String> {
        match &self.predictors {
            PredictorSelection::Explicit(list) => list.clone(),
            PredictorSelection::All => table
                .headers()
                .filter(|h| !self.response_columns.iter().any(|r| r == h))
                .filter(|h| self.group.as_deref() != Some(*h))
                .map(str::to_string)
                .collect(),
        }
    }

    /// One `ModelSpec` per response, in declaration order.
    pub fn model_specs(&self, table: &ExperimentTable) -> Vec<ModelSpec> {
        let predictors = self.resolve_predictors(table);
        self.response_columns
            .iter()
            .map(|response| ModelSpec {
                response: response.clone(),
                predictors: predictors.clone(),
                group: self.group.clone(),
                random_slopes: self.random_slopes.clone(),
                interactions: self.interactions,
                categorical: self.categorical.clone(),
            })
            .collect()
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predictor_selection_parses_keyword_and_list() {
        assert_eq!(PredictorSelection::parse("all"), PredictorSelection::All);
        assert_eq!(PredictorSelection::parse(" ALL "), PredictorSelection::All);
        assert_eq!(
            PredictorSelection::parse("Factor1, Factor2,"),
            PredictorSelection::Explicit(vec!["Factor1".to_string(), "Factor2".to_string()])
        );
    }

    #[test]
    fn json_config_fills_defaults() {
        let cfg: DoeConfig =
            serde_json::from_str(r#"{"response_columns": ["Lvalue"], "predictors": ["A", "B"]}"#).unwrap();
        assert_eq!(cfg.response_columns, vec!["Lvalue".to_string()]);
        assert_eq!(
            cfg.predictors,
            PredictorSelection::Explicit(vec!["A".to_string(), "B".to_string()])
        );
        assert_eq!(cfg.threshold, DEFAULT_THRESHOLD);
        assert!(cfg.force_full_dataset);

        let all: DoeConfig = serde_json::from_str(r#"{"predictors": "all"}"#).unwrap();
        assert_eq!(all.predictors, PredictorSelection::All);
        assert!(serde_json::from_str::<DoeConfig>(r#"{"predictors": "some"}"#).is_err());
    }

    #[test]
    fn validate_rejects_bad_threshold_and_orphan_slopes() {
        let mut cfg = DoeConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.threshold = -0.5;
        assert!(matches!(cfg.validate(), Err(DoeError::Config(_))));

        cfg.threshold = 1.5;
        cfg.random_slopes = vec!["Temp".to_string()];
        assert!(matches!(cfg.validate(), Err(DoeError::Config(_))));

        cfg.group = Some("Batch".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_response_used_as_predictor() {
        let cfg = DoeConfig {
            predictors: PredictorSelection::Explicit(vec!["Lvalue".to_string()]),
            ..DoeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_group_used_as_predictor() {
        let cfg = DoeConfig {
            predictors: PredictorSelection::Explicit(vec!["Temp".to_string(), "Batch".to_string()]),
            group: Some("Batch".to_string()),
            ..DoeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(DoeError::Config(ref m)) if m.contains("grouping column")));
    }

    #[test]
    fn validate_bounds_grid_size() {
        let slopes = |k: usize| (0..k).map(|i| format!("S{i}")).collect::<Vec<_>>();
        let mut cfg = DoeConfig {
            group: Some("Batch".to_string()),
            random_slopes: slopes(3),
            ..DoeConfig::default()
        };
        assert_eq!(cfg.grid.points(3), Some(10_000));
        assert!(cfg.validate().is_ok());

        cfg.random_slopes = slopes(4);
        assert!(matches!(cfg.validate(), Err(DoeError::Config(ref m)) if m.contains("grid points")));

        cfg.random_slopes = slopes(40);
        assert_eq!(cfg.grid.points(40), None);
        assert!(cfg.validate().is_err());
    }
}
