//! Command-line parsing for the L*a*b DOE analyzer.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! statistics. Flags only override what a JSON config (or the defaults)
//! already provide, so every field that maps onto `DoeConfig` is optional.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "doe", version, about = "Mixed-model DOE analysis for L*a*b colour data")]
pub struct Cli {
    /// Debug-level logging on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every response, reduce to log-worth and write the result files.
    Analyze(AnalyzeArgs),
    /// Write a synthetic DOE CSV with known effects.
    Sample(SampleArgs),
}

#[derive(Debug, Args, Clone)]
pub struct AnalyzeArgs {
    /// CSV file to analyse.
    #[arg(short, long, value_name = "CSV", conflicts_with = "data", required_unless_present = "data")]
    pub input: Option<PathBuf>,

    /// Inline CSV payload: raw CSV text, base64, or a `data:...;base64,` URI.
    #[arg(long, value_name = "PAYLOAD")]
    pub data: Option<String>,

    /// Directory receiving the result files (created if missing).
    #[arg(short, long, env = "DOE_OUTPUT_DIR", default_value = "doe_output")]
    pub output_dir: PathBuf,

    /// JSON config file; flags given here take precedence.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Comma-separated response columns.
    #[arg(long, env = "DOE_RESPONSES")]
    pub responses: Option<String>,

    /// `all` or a comma-separated predictor list.
    #[arg(long)]
    pub predictors: Option<String>,

    /// Log-worth threshold θ (selected when p ≤ 10^-θ).
    #[arg(long, env = "DOE_THRESHOLD")]
    pub threshold: Option<f64>,

    /// Analyse every response on the rows complete for all responses.
    #[arg(long)]
    pub common_rows: bool,

    /// Grouping column for the random intercept.
    #[arg(short, long)]
    pub group: Option<String>,

    /// Comma-separated continuous predictors with a random slope per group.
    #[arg(long)]
    pub random_slopes: Option<String>,

    /// Add all two-way interactions between predictors.
    #[arg(long)]
    pub interactions: bool,

    /// Comma-separated columns forced to categorical encoding.
    #[arg(long)]
    pub categorical: Option<String>,

    /// Fit responses one after another instead of on the thread pool.
    #[arg(long)]
    pub serial: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Output CSV path.
    #[arg(short, long, default_value = "doe_sample.csv")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of batches (random-effect groups).
    #[arg(long, default_value_t = 4)]
    pub batches: usize,

    #[arg(long, default_value_t = 9)]
    pub rows_per_batch: usize,

    /// Residual standard deviation.
    #[arg(long, default_value_t = 0.3)]
    pub noise_sd: f64,

    /// Standard deviation of batch offsets.
    #[arg(long, default_value_t = 1.0)]
    pub batch_sd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_parses_overrides() {
        let cli = Cli::try_parse_from([
            "doe",
            "analyze",
            "--input",
            "runs.csv",
            "--threshold",
            "2",
            "--group",
            "Batch",
            "--common-rows",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.input, Some(PathBuf::from("runs.csv")));
        assert_eq!(args.threshold, Some(2.0));
        assert_eq!(args.group.as_deref(), Some("Batch"));
        assert!(args.common_rows);
        assert!(!args.serial);
    }

    #[test]
    fn analyze_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["doe", "analyze"]).is_err());
        assert!(Cli::try_parse_from(["doe", "analyze", "--input", "a.csv", "--data", "eA=="]).is_err());
    }

    #[test]
    fn data_help_lists_every_payload_form() {
        use clap::CommandFactory;

        let cmd = Cli::command();
        let analyze = cmd.find_subcommand("analyze").unwrap();
        let data = analyze.get_arguments().find(|a| a.get_id() == "data").unwrap();
        let help = data.get_help().unwrap().to_string();
        assert!(help.contains("raw CSV") && help.contains("base64") && help.contains("data:"), "{help}");
    }

    #[test]
    fn sample_defaults() {
        let cli = Cli::try_parse_from(["doe", "sample"]).unwrap();
        let Command::Sample(args) = cli.command else {
            panic!("expected sample");
        };
        assert_eq!(args.out, PathBuf::from("doe_sample.csv"));
        assert_eq!(args.batches, 4);
    }
}
