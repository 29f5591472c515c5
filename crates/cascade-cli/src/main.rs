use std::path::PathBuf;

use cascade_cache::{CacheAdapters, Config, MemoryCache};
use cascade_cli::commands::{ConsolidateCommand, RecordCommand, StatsCommand, SweepCommand};
use cascade_cli::error::{CliError, CliResult};
use cascade_cli::output::OutputFormat;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cascade-cli")]
#[command(about = "Cascade CLI - Inspect and maintain a tiered memory cache")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Record management commands")]
    Record(RecordCommand),

    #[clap(about = "Show tier statistics")]
    Stats(StatsCommand),

    #[clap(about = "Run one consolidation pass")]
    Consolidate(ConsolidateCommand),

    #[clap(about = "Sweep warm overflow to cold and remove stale copies")]
    Sweep(SweepCommand),
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cascade_cache=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }
    tracing::debug!("Using data directory {}", config.storage.data_dir.display());

    let data_dir = config.storage.data_dir.clone();
    let at_data_dir = |e: CliError| e.in_data_dir(&data_dir);

    let adapters = CacheAdapters::filesystem(&config.storage)
        .await
        .map_err(|e| at_data_dir(e.into()))?;
    let cache = MemoryCache::open(config, adapters)
        .await
        .map_err(|e| at_data_dir(e.into()))?;

    let result = match &cli.command {
        Command::Record(cmd) => cmd.execute(&cache, format).await,
        Command::Stats(cmd) => cmd.execute(&cache, format).await,
        Command::Consolidate(cmd) => cmd.execute(&cache, format).await,
        Command::Sweep(cmd) => cmd.execute(&cache, format).await,
    };

    // Hot is process memory; anything added must reach Warm before exit
    cache.shutdown().await.map_err(|e| at_data_dir(e.into()))?;
    result.map_err(at_data_dir)
}
