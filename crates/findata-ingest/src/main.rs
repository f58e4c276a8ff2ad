//! findata-ingest - operator CLI for the ingestion pipeline

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use findata_common::logging::{init_logging, LogConfig, LogLevel};
use findata_ingest::{
    BatchStatus, BatchStore, ClickHouseStore, IngestConfig, IngestionOrchestrator, PgBatchStore,
    PgRelationalStore, PgSourceProvider,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "findata-ingest")]
#[command(author, version, about = "Loan data ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one dataset for a tenant and loan type
    Run {
        /// Tenant code, e.g. BANK001
        #[arg(short, long)]
        tenant: String,

        /// RETAIL or COMMERCIAL
        #[arg(short, long)]
        loan_type: String,

        /// CREDIT (default) or PAYMENT_PLAN
        #[arg(short, long)]
        dataset: Option<String>,

        /// Continue an existing STARTED batch instead of creating one
        #[arg(long)]
        batch_id: Option<Uuid>,
    },

    /// Print a batch record as JSON
    Status {
        batch_id: Uuid,
    },

    /// Print the validation errors of a batch as JSON
    Errors {
        batch_id: Uuid,

        /// Maximum number of errors to print
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Apply database migrations
    Migrate,
}

async fn connect(config: &IngestConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to the database")?;
    info!("Database connection pool established");
    Ok(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("findata-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = IngestConfig::load().context("Failed to load configuration")?;
    let pool = connect(&config).await?;

    match cli.command {
        Command::Run {
            tenant,
            loan_type,
            dataset,
            batch_id,
        } => {
            let orchestrator = IngestionOrchestrator::new(
                Arc::new(PgSourceProvider::new(pool.clone()).with_fetch_size(config.load.fetch_size)),
                Arc::new(PgRelationalStore::new(pool.clone())),
                Arc::new(ClickHouseStore::new(&config.clickhouse)?),
                Arc::new(
                    PgBatchStore::new(pool.clone()).with_error_chunk_size(config.load.error_chunk_size),
                ),
            )
            .with_load_config(config.load)
            .with_database_prefix(config.clickhouse.database_prefix.clone());

            let batch = orchestrator
                .run_batch(&tenant, &loan_type, dataset.as_deref(), batch_id)
                .await
                .context("Ingestion run failed")?;

            println!("{}", serde_json::to_string_pretty(&batch)?);
            if batch.status != BatchStatus::Success {
                anyhow::bail!("Batch {} finished as {}", batch.id, batch.status);
            }
        },
        Command::Status { batch_id } => {
            let batch = PgBatchStore::new(pool)
                .load(batch_id)
                .await?
                .with_context(|| format!("Batch {batch_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
        },
        Command::Errors { batch_id, limit } => {
            let errors = PgBatchStore::new(pool).list_errors(batch_id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&errors)?);
        },
        Command::Migrate => {
            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Database migrations completed");
        },
    }

    Ok(())
}
