//! Batch entry points for the leaderboard cache.
//!
//! ```bash
//! DATABASE_PATH=./points.db pointsboard populate-all
//! DATABASE_PATH=./points.db pointsboard --json populate-week 2024-w07 --force
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use pointsboard::orchestration::PartitionOutcome;
use pointsboard::{
    config::Config, db::init_db, LeaderboardCache, PopulateOptions, PopulateSummary, Repository,
    WeekId,
};
use std::sync::Arc;

/// Recompute multiplier-adjusted leaderboards.
#[derive(Parser)]
#[command(name = "pointsboard")]
#[command(version)]
#[command(about = "Populate the points leaderboard cache", long_about = None)]
struct Cli {
    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute every season and week
    PopulateAll {
        /// Supersede runs already in progress
        #[arg(long)]
        force: bool,
    },

    /// Recompute one week (with its categories) and its season
    PopulateWeek {
        week_id: String,

        /// Supersede a run already in progress
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(summary) => {
            if json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(out) => println!("{}", out),
                    Err(e) => {
                        eprintln!("Failed to encode summary: {}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                print_summary(&summary);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<PopulateSummary> {
    let config = Config::from_env().context("Configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));
    let cache = LeaderboardCache::new(repo.clone(), repo.clone(), repo, &config);

    let summary = match cli.command {
        Commands::PopulateAll { force } => cache.populate_all(PopulateOptions { force }).await,
        Commands::PopulateWeek { week_id, force } => {
            cache
                .populate_week(&WeekId::new(week_id), PopulateOptions { force })
                .await
        }
    }
    .context("Population failed")?;

    Ok(summary)
}

fn print_summary(summary: &PopulateSummary) {
    println!("run {}", summary.run_id);
    for partition in &summary.partitions {
        let outcome = match partition.outcome {
            PartitionOutcome::Populated => "populated",
            PartitionOutcome::AlreadyPopulating => "already populating",
            PartitionOutcome::Superseded => "superseded",
        };
        println!(
            "  {:<32} {:<18} scopes={} rows={} skipped={} excluded={}",
            partition.partition,
            outcome,
            partition.scopes_written,
            partition.rows_written,
            partition.rows_skipped,
            partition.accounts_excluded
        );
    }
    println!(
        "partitions processed: {}, scopes written: {}, rows written: {}, rows skipped: {}, accounts excluded: {}, superseded: {}, already populating: {}",
        summary.partitions_processed,
        summary.scopes_written,
        summary.rows_written,
        summary.rows_skipped,
        summary.accounts_excluded,
        summary.superseded,
        summary.already_populating
    );
}
