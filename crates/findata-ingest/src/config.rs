//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default relational database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/findata";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default ClickHouse HTTP interface URL.
pub const DEFAULT_CLICKHOUSE_URL: &str = "http://localhost:8123";

/// Default ClickHouse user.
pub const DEFAULT_CLICKHOUSE_USER: &str = "default";

/// Prefix of per-tenant analytical databases (`dwh_bank001`).
pub const DEFAULT_CLICKHOUSE_DATABASE_PREFIX: &str = "dwh_";

/// Default ClickHouse request timeout in seconds.
pub const DEFAULT_CLICKHOUSE_TIMEOUT_SECS: u64 = 60;

/// Rows buffered per destination before a flush.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Rows fetched from the source per round trip.
pub const DEFAULT_FETCH_SIZE: usize = 2000;

/// Validation errors persisted per insert statement.
pub const DEFAULT_ERROR_CHUNK_SIZE: usize = 1000;

/// Adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub clickhouse: ClickHouseConfig,
    pub load: LoadConfig,
}

/// Relational store (system of record and source tables)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Analytical store HTTP interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub database_prefix: String,
    pub timeout_secs: u64,
}

/// Chunking of the load pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadConfig {
    pub chunk_size: usize,
    pub fetch_size: usize,
    pub error_chunk_size: usize,
}

impl IngestConfig {
    /// Load configuration from `.env`, environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            clickhouse: ClickHouseConfig {
                url: std::env::var("CLICKHOUSE_URL")
                    .unwrap_or_else(|_| DEFAULT_CLICKHOUSE_URL.to_string()),
                user: std::env::var("CLICKHOUSE_USER")
                    .unwrap_or_else(|_| DEFAULT_CLICKHOUSE_USER.to_string()),
                password: std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default(),
                database_prefix: std::env::var("CLICKHOUSE_DATABASE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_CLICKHOUSE_DATABASE_PREFIX.to_string()),
                timeout_secs: env_parse("CLICKHOUSE_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_CLICKHOUSE_TIMEOUT_SECS),
            },
            load: LoadConfig {
                chunk_size: env_parse("INGEST_CHUNK_SIZE").unwrap_or(DEFAULT_CHUNK_SIZE),
                fetch_size: env_parse("INGEST_FETCH_SIZE").unwrap_or(DEFAULT_FETCH_SIZE),
                error_chunk_size: env_parse("INGEST_ERROR_CHUNK_SIZE")
                    .unwrap_or(DEFAULT_ERROR_CHUNK_SIZE),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.clickhouse.url.is_empty() {
            anyhow::bail!("ClickHouse URL cannot be empty");
        }

        self.load.validate()
    }
}

impl ClickHouseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LoadConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("INGEST_CHUNK_SIZE must be greater than 0");
        }
        if self.fetch_size == 0 {
            anyhow::bail!("INGEST_FETCH_SIZE must be greater than 0");
        }
        if self.error_chunk_size == 0 {
            anyhow::bail!("INGEST_ERROR_CHUNK_SIZE must be greater than 0");
        }
        Ok(())
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
            error_chunk_size: DEFAULT_ERROR_CHUNK_SIZE,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            clickhouse: ClickHouseConfig {
                url: DEFAULT_CLICKHOUSE_URL.to_string(),
                user: DEFAULT_CLICKHOUSE_USER.to_string(),
                password: String::new(),
                database_prefix: DEFAULT_CLICKHOUSE_DATABASE_PREFIX.to_string(),
                timeout_secs: DEFAULT_CLICKHOUSE_TIMEOUT_SECS,
            },
            load: LoadConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
