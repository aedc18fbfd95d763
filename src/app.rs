//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - layers flags over the JSON config / defaults
//! - runs the analysis pipeline and prints the transcript

use std::fs;

use clap::Parser;
use tracing::debug;

use crate::cli::{AnalyzeArgs, Cli, Command, SampleArgs};
use crate::data::{generate_doe, SampleSpec};
use crate::domain::{parse_list, DoeConfig, PredictorSelection};
use crate::error::{DoeError, Result};
use crate::io::CsvSource;

pub mod pipeline;

pub use pipeline::{run_doe, run_doe_source, DoeRun};

/// Entry point for the `doe` binary.
pub fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    crate::logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Analyze(args) => handle_analyze(&args),
        Command::Sample(args) => handle_sample(&args),
    }
}

fn handle_analyze(args: &AnalyzeArgs) -> Result<()> {
    let config = config_from_args(args)?;
    debug!(?config, "resolved configuration");

    let source = match (&args.input, &args.data) {
        (Some(path), _) => CsvSource::Path(path.clone()),
        (None, Some(payload)) => CsvSource::from_payload(payload)?,
        (None, None) => return Err(DoeError::Input("either --input or --data is required".to_string())),
    };

    let run = run_doe_source(&source, &args.output_dir, &config)?;

    print!("{}", run.console_text);
    println!();
    println!("Files in {}:", args.output_dir.display());
    for f in &run.files_written {
        println!("  {f}");
    }
    Ok(())
}

fn handle_sample(args: &SampleArgs) -> Result<()> {
    let spec = SampleSpec {
        batches: args.batches,
        rows_per_batch: args.rows_per_batch,
        seed: args.seed,
        noise_sd: args.noise_sd,
        batch_sd: args.batch_sd,
    };
    let sample = generate_doe(&spec)?;
    fs::write(&args.out, &sample.csv).map_err(|e| DoeError::io_at("Failed to write sample", &args.out, e))?;
    println!("Wrote {} rows to {}", sample.rows, args.out.display());
    Ok(())
}

/// Defaults, then the JSON config (if any), then explicit flags.
pub fn config_from_args(args: &AnalyzeArgs) -> Result<DoeConfig> {
    let mut config = match &args.config {
        Some(path) => DoeConfig::from_json_file(path)?,
        None => DoeConfig::default(),
    };

    if let Some(r) = &args.responses {
        config.response_columns = parse_list(r);
    }
    if let Some(p) = &args.predictors {
        config.predictors = PredictorSelection::parse(p);
    }
    if let Some(t) = args.threshold {
        config.threshold = t;
    }
    if args.common_rows {
        config.force_full_dataset = false;
    }
    if let Some(g) = &args.group {
        config.group = Some(g.clone());
    }
    if let Some(s) = &args.random_slopes {
        config.random_slopes = parse_list(s);
    }
    if args.interactions {
        config.interactions = true;
    }
    if let Some(c) = &args.categorical {
        config.categorical = parse_list(c);
    }
    if args.serial {
        config.parallel = false;
    }
    Ok(config)
}
