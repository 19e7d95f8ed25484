use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use income_predictor::data::loader::{LoadOptions, load_file};
use income_predictor::output::{OutputFormat, write_result};
use income_predictor::{ArtifactPaths, ArtifactStore, PipelineConfig, PredictionService};

/// Predict income for every record of a CSV, JSON or Parquet file.
#[derive(Parser, Debug)]
#[command(name = "income-predictor", version)]
struct Cli {
    /// Input file (.csv with `;` separator and `,` decimals, .json, .parquet)
    input: PathBuf,

    /// Directory holding the model artifacts
    #[arg(short, long, default_value = ".")]
    artifacts: PathBuf,

    /// Pipeline configuration (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Output path (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let store = ArtifactStore::open(ArtifactPaths::in_dir(&cli.artifacts), &config)
        .context("loading model artifacts")?;
    let service = PredictionService::new(store, config);

    let table = load_file(&cli.input, &LoadOptions::default())
        .with_context(|| format!("loading {}", cli.input.display()))?;
    info!(
        "loaded {} rows × {} columns from {}",
        table.n_rows(),
        table.n_cols(),
        cli.input.display()
    );

    let result = service.predict(table)?;

    let file_name = cli
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    write_result(&result, cli.format, file_name, out)
}
