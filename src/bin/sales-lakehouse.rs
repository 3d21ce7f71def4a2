//! Command-line entry point: run the pipeline, upload raw inputs, inspect configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use sales_lakehouse::cleaning::load_raw;
use sales_lakehouse::config::{LoggingConfig, PipelineConfig};
use sales_lakehouse::context::PipelineContext;
use sales_lakehouse::execution::{Pipeline, RunOptions, Stage, TracingObserver};

/// Batch pipeline: raw CSV → cleaned Parquet → aggregate views → document store.
#[derive(Parser, Debug)]
#[command(name = "sales-lakehouse", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "SALES_LAKEHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Object store root directory (overrides `object_store.root`)
    #[arg(long)]
    lake: Option<PathBuf>,

    /// Document store root directory (overrides `document_store.root`)
    #[arg(long)]
    warehouse: Option<PathBuf>,

    /// Worker threads (overrides `execution.workers`)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log filter, e.g. `debug` or `sales_lakehouse=trace` (overrides `logging.level`)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline and print the run report as JSON
    Run {
        /// First stage to execute; earlier stages only verify their artifacts
        #[arg(long, default_value = "clean")]
        from: Stage,

        /// Last stage to execute
        #[arg(long, default_value = "publish")]
        to: Stage,

        /// Also write the run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Upload local CSV files into the raw tier
    LoadRaw {
        #[arg(long)]
        customers: PathBuf,

        #[arg(long)]
        purchases: PathBuf,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = effective_config(&cli)?;

    match cli.command {
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::LoadRaw {
            customers,
            purchases,
        } => {
            setup_logging(&config.logging)?;
            let ctx = PipelineContext::from_config(&config)?;
            let customers = read_file(&customers)?;
            let purchases = read_file(&purchases)?;
            load_raw(&ctx, &customers, &purchases).context("uploading raw objects")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { from, to, report } => {
            setup_logging(&config.logging)?;
            let ctx = PipelineContext::from_config(&config)?;
            let pipeline = Pipeline::new(ctx, config.execution_options())?
                .with_retry_policy(config.retry_policy())
                .with_observer(Arc::new(TracingObserver));

            let options = RunOptions {
                start_from: from,
                stop_after: to,
            };
            let run_report = pipeline.run(&options)?;

            let json = serde_json::to_string_pretty(&run_report)?;
            println!("{json}");
            if let Some(path) = report {
                std::fs::write(&path, &json)
                    .with_context(|| format!("writing run report to {}", path.display()))?;
            }

            Ok(if run_report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn effective_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = &cli.lake {
        config.object_store.root = root.clone();
    }
    if let Some(root) = &cli.warehouse {
        config.document_store.root = root.clone();
    }
    if let Some(n) = cli.workers {
        config.execution.workers = Some(n);
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.log_json {
        config.logging.json = true;
    }
    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Install the global `tracing` subscriber. `RUST_LOG` takes precedence over the configured level.
fn setup_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
