//! Catalog Enrich - book enrichment runner

use anyhow::{Context, Result};
use catalog_common::logging::{init_logging, LogConfig, LogLevel};
use catalog_enrich::config::EnrichConfig;
use catalog_enrich::db::{create_pool, run_migrations, DbConfig};
use catalog_enrich::enrich::{
    BulkPersistence, CatalogStore, EnrichmentOrchestrator, HttpLookupClient, PgCatalogStore,
};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog-enrich")]
#[command(author, version, about = "Catalog book enrichment runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Enrich every pending book once
    Run {
        /// Do not apply schema migrations before the run
        #[arg(long)]
        skip_migrations: bool,
    },

    /// Print pending and completed enrichment job counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("catalog-enrich")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let db_config = DbConfig::from_env()?;
    let pool = create_pool(&db_config).await?;

    match cli.command {
        Command::Run { skip_migrations } => {
            if !skip_migrations {
                run_migrations(&pool).await?;
            }

            let config = EnrichConfig::from_env()?;
            info!(
                credentials = config.api_keys.len(),
                daily_limit = config.daily_limit,
                "Starting enrichment run"
            );

            let store = Arc::new(PgCatalogStore::new(pool));
            let lookup = Arc::new(
                HttpLookupClient::new(config.lookup_config())
                    .context("Failed to build lookup client")?,
            );
            let persistence = BulkPersistence::new(store.clone(), config.batch_executor())
                .with_error_message_max_len(config.error_message_max_len);

            let orchestrator = EnrichmentOrchestrator::new(
                store,
                lookup,
                config.credentials(),
                config.daily_limit,
                persistence,
            );

            let report = orchestrator.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        Command::Status => {
            let store = PgCatalogStore::new(pool);
            let counts = store.count_jobs().await?;
            println!("pending:   {}", counts.pending);
            println!("completed: {}", counts.completed);
        },
    }

    Ok(())
}
