//! `gapfill` command line.
//!
//! ```bash
//! gapfill run --config gapfill.toml --data-dir ./data
//! gapfill derive --config gapfill.toml --data-dir ./data --output ./data/ceds-derived.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use emissions_gapfill::pipeline::{derive, load_reference, run};
use emissions_gapfill::store::{CsvStore, EmissionsSink};
use emissions_gapfill::RunConfig;

#[derive(Parser, Debug)]
#[command(name = "gapfill")]
#[command(about = "Fill emissions gaps across inventories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Gap-fill, convert to CO2e and write the dense output table
    Run {
        /// TOML run configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding inventories and reference tables
        #[arg(short, long)]
        data_dir: PathBuf,
        /// Overrides `output.path` from the configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build the derived combustion inventory
    Derive {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            output,
        } => {
            let cfg = RunConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            let refs = load_reference(&cfg, &data_dir).context("loading reference tables")?;
            let output = output.unwrap_or_else(|| data_dir.join(&cfg.output.path));
            let mut store = CsvStore::new(&data_dir, output);
            let summary = run(&cfg, &data_dir, &refs, &store.clone(), &mut store)
                .context("gap-filling run failed")?;
            info!(
                run_id = %summary.run_id,
                records = summary.records_written,
                path = %store.output().display(),
                "done"
            );
        }
        Command::Derive {
            config,
            data_dir,
            output,
        } => {
            let cfg = RunConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            let refs = load_reference(&cfg, &data_dir).context("loading reference tables")?;
            let mut store = CsvStore::new(&data_dir, output);
            let records = derive(&cfg, &data_dir, &refs, &store).context("deriving sectors")?;
            store
                .write(&records)
                .with_context(|| format!("writing {}", store.output().display()))?;
            info!(records = records.len(), "derived inventory written");
        }
    }
    Ok(())
}
