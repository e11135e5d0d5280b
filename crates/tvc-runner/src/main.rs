//! # tvc-runner
//!
//! Main entry point for the candle collector.
//!
//! Loads a JSON configuration file, starts one collector per configured
//! symbol, and manages their lifecycle. Offline `query` and `prune` commands
//! work directly on the candle database.
//!
//! # Usage
//!
//! ```bash
//! tvc-runner collect config.json --log-level info
//! tvc-runner query config.json BINANCE:BTCUSDT --limit 10
//! tvc-runner prune config.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tvc_core::config::{AppConfig, load_config};
use tvc_md::persist_worker::prune_symbol;
use tvc_md::{Collector, CollectorConfig};
use tvc_store::RetentionStore;

/// TradingView candle collector.
#[derive(Parser)]
#[command(name = "tvc-runner", about = "TradingView candle collector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Optional log directory for file output (overrides `log_path`).
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Stream candles for every configured symbol until Ctrl+C.
    Collect {
        /// Configuration file path (JSON).
        config: PathBuf,
    },
    /// Print stored candles as JSON lines.
    Query {
        config: PathBuf,
        symbol: String,
        /// Inclusive lower bound, epoch milliseconds.
        #[arg(long)]
        start: Option<i64>,
        /// Inclusive upper bound, epoch milliseconds.
        #[arg(long)]
        end: Option<i64>,
        /// Keep only the newest N candles of the range.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Prune every configured symbol once, then compact.
    Prune { config: PathBuf },
}

impl Command {
    fn config_path(&self) -> &PathBuf {
        match self {
            Command::Collect { config } | Command::Query { config, .. } | Command::Prune { config } => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config errors are fatal before anything connects.
    let config_path = cli.command.config_path().clone();
    let config = load_config(&config_path).with_context(|| format!("loading {}", config_path.display()))?;

    let log_dir = cli.log_dir.clone().or_else(|| config.log_path.clone());
    tvc_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name);

    match cli.command {
        Command::Collect { .. } => collect(&config).await,
        Command::Query { symbol, start, end, limit, .. } => query(&config, &symbol, start, end, limit),
        Command::Prune { .. } => prune(&config),
    }
}

async fn collect(config: &AppConfig) -> Result<()> {
    info!(
        "collector starting: {} symbol(s), db={}, retention={}h",
        config.symbols.len(),
        config.db_path,
        config.retention_hours
    );

    let mut collectors = Vec::with_capacity(config.symbols.len());
    for symbol in &config.symbols {
        // One connection per symbol; WAL lets them write the same file.
        let store = RetentionStore::open(&config.db_path)
            .with_context(|| format!("opening {} for {symbol}", config.db_path))?;
        collectors.push(Collector::start(CollectorConfig::from_app(config, symbol), store));
        info!("collector '{symbol}' started");
    }

    info!("all {} collector(s) started; press Ctrl+C to stop", collectors.len());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    for collector in collectors {
        let symbol = collector.symbol().to_string();
        let stats = collector.stop().await;
        info!(
            "collector '{symbol}' stopped: written={} failed={} pruned={} prune_runs={}",
            stats.written, stats.failed, stats.pruned, stats.prune_runs
        );
    }

    info!("all collectors stopped, goodbye");
    Ok(())
}

fn query(config: &AppConfig, symbol: &str, start: Option<i64>, end: Option<i64>, limit: Option<usize>) -> Result<()> {
    let store = RetentionStore::open(&config.db_path)?;
    for candle in store.query(symbol, start, end, limit)? {
        println!("{}", serde_json::to_string(&candle)?);
    }
    Ok(())
}

fn prune(config: &AppConfig) -> Result<()> {
    let store = RetentionStore::open(&config.db_path)?;
    let mut total = 0;
    for symbol in &config.symbols {
        match prune_symbol(&store, symbol, config.retention_hours, false) {
            Ok(n) => {
                info!("pruned {n} rows for '{symbol}'");
                total += n;
            }
            Err(e) => error!(symbol = %symbol, op = "prune", "prune failed: {e}"),
        }
    }
    if config.compact_after_prune {
        store.compact();
    }
    info!("prune complete: {total} rows deleted");
    Ok(())
}
