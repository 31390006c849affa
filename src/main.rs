//! Prediction Round Watcher CLI
//!
//! Records round outcomes and pre-lock pool snapshots from an on-chain
//! prediction market into SQLite.

use anyhow::Result;
use clap::{Parser, Subcommand};
use prediction_watcher::chain::RetryConfig;
use prediction_watcher::services::backfill_rounds;
use prediction_watcher::{
    calculate_implied_multiples, Config, Database, PredictionContract, RoundSource, RoundWatcher, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prediction-watcher")]
#[command(about = "Round and pool snapshot recorder for on-chain prediction markets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live watcher
    Watch {
        /// Poll interval in milliseconds (overrides POLL_INTERVAL_MS)
        #[arg(short, long)]
        poll_interval_ms: Option<u64>,
    },

    /// Finalize a range of past rounds
    Backfill {
        /// First epoch (inclusive)
        #[arg(long)]
        from: u64,

        /// Last epoch (inclusive)
        #[arg(long)]
        to: u64,
    },

    /// Show one round as currently reported by the contract
    Round {
        /// Epoch to fetch (defaults to the current epoch)
        epoch: Option<u64>,
    },

    /// Show stored round and snapshot counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = Config::from_env()?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    match cli.command {
        Commands::Watch { poll_interval_ms } => {
            config.watcher = config.watcher_config(poll_interval_ms)?;
            watch(&config).await?
        }
        Commands::Backfill { from, to } => backfill(&config, from, to).await?,
        Commands::Round { epoch } => show_round(&config, epoch).await?,
        Commands::Stats => show_stats(&config).await?,
    }

    Ok(())
}

fn contract(config: &Config) -> Result<PredictionContract> {
    let retry = RetryConfig {
        max_retries: config.rpc_max_retries,
        ..Default::default()
    };
    PredictionContract::new(
        &config.rpc_url,
        config.contract_address,
        Duration::from_secs(config.rpc_timeout_secs),
        retry,
    )
}

async fn watch(config: &Config) -> Result<()> {
    let source = Arc::new(contract(config)?);
    info!(
        "Watching contract {:?} via {} -> {}",
        source.address(),
        config.rpc_url,
        config.database_path
    );
    let db = Arc::new(Database::new(&config.database_path).await?);

    let watcher = RoundWatcher::new(source, db, Arc::new(SystemClock), config.watcher.clone());
    watcher.run().await;

    Ok(())
}

async fn backfill(config: &Config, from: u64, to: u64) -> Result<()> {
    let source = contract(config)?;
    let db = Database::new(&config.database_path).await?;

    let report = backfill_rounds(&source, &db, from, to).await?;

    println!("\nBackfill {}..={}", from, to);
    println!("  Written:    {}", report.written);
    println!("  Unchanged:  {}", report.unchanged);
    println!("  Unresolved: {:?}", report.unresolved);
    println!("  Failed:     {:?}", report.failed);

    Ok(())
}

async fn show_round(config: &Config, epoch: Option<u64>) -> Result<()> {
    let source = contract(config)?;
    let epoch = match epoch {
        Some(e) => e,
        None => source.current_epoch().await?,
    };
    let round = source.get_round(epoch).await?;
    let odds = calculate_implied_multiples(round.total_amount, round.bull_amount, round.bear_amount);
    let now = chrono::Utc::now().timestamp();

    println!("\n{}", "=".repeat(60));
    println!("  ROUND {}", round.epoch);
    println!("{}", "=".repeat(60));
    println!("  Lock in:       {}s", round.seconds_until_lock(now));
    println!("  Lock price:    {}", round.lock_price);
    println!("  Close price:   {}", round.close_price);
    println!("  Total (wei):   {}", round.total_amount);
    println!("  Bull (wei):    {}", round.bull_amount);
    println!("  Bear (wei):    {}", round.bear_amount);
    println!("  Implied up:    {}", fmt_multiple(odds.up));
    println!("  Implied down:  {}", fmt_multiple(odds.down));
    println!("  Oracle called: {}", round.oracle_called);
    println!("  Winner:        {}", round.winner());
    println!("  Multiple:      {}", fmt_multiple(round.winner_multiple()));

    Ok(())
}

async fn show_stats(config: &Config) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let stats = db.stats().await?;

    println!("\n{}", "=".repeat(40));
    println!("  STORE STATISTICS ({})", config.database_path);
    println!("{}", "=".repeat(40));
    println!("  Rounds:          {}", stats.rounds);
    println!("  Resolved rounds: {}", stats.resolved_rounds);
    println!(
        "  Latest epoch:    {}",
        stats.latest_epoch.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!("  Snapshots:       {}", stats.snapshots);
    for (snapshot_type, count) in &stats.snapshots_by_type {
        println!("    {:<14} {}", snapshot_type, count);
    }

    Ok(())
}

fn fmt_multiple(multiple: Option<f64>) -> String {
    multiple
        .map(|m| format!("{:.4}x", m))
        .unwrap_or_else(|| "-".to_string())
}
