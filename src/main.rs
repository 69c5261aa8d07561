use anyhow::{Context, Result};
use budget_sheet::{read_grid, resolve_grid, EngineOptions, Snapshot};
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// Resolve the formulas of a pipe-delimited budget sheet and print the result.
#[derive(Parser)]
#[command(name = "budget-sheet", version, about)]
struct Cli {
    /// Pipe-delimited sheet to read
    #[arg(default_value = "transactions.csv")]
    input: PathBuf,

    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Digits after the decimal point for numeric results
    #[arg(long, default_value_t = budget_sheet::engine::DEFAULT_PRECISION)]
    precision: usize,

    /// Cap on `=^^` propagation sweeps (default: number of markers + 1)
    #[arg(long)]
    max_sweeps: Option<usize>,

    /// Exit with a non-zero status when any cell fails to resolve
    #[arg(long)]
    strict: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut grid = read_grid(&cli.input)
        .with_context(|| format!("Failed to load '{}'", cli.input.display()))?;
    let options = EngineOptions {
        precision: cli.precision,
        max_propagation_sweeps: cli.max_sweeps,
    };
    let report = resolve_grid(&mut grid, &options);

    match cli.format {
        OutputFormat::Table => {
            print!("{}", grid.render());
            for failure in &report.failures {
                eprintln!("{}: {}", failure.cell, failure.error);
            }
        }
        OutputFormat::Json => {
            let json = Snapshot::new(&grid, &report)
                .to_json()
                .context("Failed to serialize the resolved sheet")?;
            println!("{json}");
        }
    }

    if cli.strict && !report.is_clean() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
