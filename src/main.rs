use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod generate;
mod judge;
mod models;
mod normalize;
mod output;
mod processor;
mod runner;
mod stages;
mod stats;
mod table;
mod validation;

use crate::client::{ChatBackend, OpenAiBackend};
use crate::config::{ApiConfig, Config};
use crate::output::OutputFormat;
use crate::runner::Runner;

/// Benchmark pipeline: prepare tables, collect model answers and score them with an LLM judge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - log every row
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy raw benchmarks into the prepared directory, adding reference ids
    Prepare {
        #[arg(long)]
        raw_dir: Option<PathBuf>,
        #[arg(long)]
        prepared_dir: Option<PathBuf>,
    },
    /// Answer every prepared table with the model under test
    Generate {
        #[arg(long)]
        prepared_dir: Option<PathBuf>,
        #[arg(long)]
        evaluated_dir: Option<PathBuf>,
    },
    /// Copy evaluated tables into the extracted directory, adding cited reference ids
    Extract {
        #[arg(long)]
        evaluated_dir: Option<PathBuf>,
        #[arg(long)]
        extracted_dir: Option<PathBuf>,
    },
    /// Score every extracted table with the judge model
    Judge {
        #[arg(long)]
        extracted_dir: Option<PathBuf>,
        #[arg(long)]
        judged_dir: Option<PathBuf>,
        /// Maximum concurrent judge calls per table
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Run prepare, generate, extract and judge in order
    All,
}

impl Command {
    /// Apply directory and worker overrides on top of the loaded configuration
    fn apply(&self, config: &mut Config) {
        let paths = &mut config.paths;
        match self {
            Command::Prepare { raw_dir, prepared_dir } => {
                override_with(&mut paths.raw_dir, raw_dir);
                override_with(&mut paths.prepared_dir, prepared_dir);
            }
            Command::Generate { prepared_dir, evaluated_dir } => {
                override_with(&mut paths.prepared_dir, prepared_dir);
                override_with(&mut paths.evaluated_dir, evaluated_dir);
            }
            Command::Extract { evaluated_dir, extracted_dir } => {
                override_with(&mut paths.evaluated_dir, evaluated_dir);
                override_with(&mut paths.extracted_dir, extracted_dir);
            }
            Command::Judge { extracted_dir, judged_dir, max_workers } => {
                override_with(&mut paths.extracted_dir, extracted_dir);
                override_with(&mut paths.judged_dir, judged_dir);
                if let Some(max_workers) = max_workers {
                    config.judge.max_workers = (*max_workers).max(1);
                }
            }
            Command::All => {}
        }
    }
}

fn override_with(target: &mut PathBuf, value: &Option<PathBuf>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

/// Connect to the model described by `config`
fn backend(config: &ApiConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    Ok(Arc::new(OpenAiBackend::from_config(config)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "benchjudge=debug,info"
    } else {
        "benchjudge=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    args.command.apply(&mut config);

    let runner = Runner::new(config);
    let summaries = match args.command {
        Command::Prepare { .. } => runner.prepare()?,
        Command::Generate { .. } => {
            let generator = backend(&runner.config().generator.api)?;
            runner.generate(generator).await?
        }
        Command::Extract { .. } => runner.extract()?,
        Command::Judge { .. } => {
            let judge = backend(&runner.config().judge.api)?;
            runner.judge(judge).await?
        }
        Command::All => {
            let generator = backend(&runner.config().generator.api)?;
            let judge = backend(&runner.config().judge.api)?;

            let mut summaries = runner.prepare()?;
            summaries.extend(runner.generate(generator).await?);
            summaries.extend(runner.extract()?);
            summaries.extend(runner.judge(judge).await?);
            summaries
        }
    };

    output::print_summaries(&summaries, args.output);

    Ok(())
}
