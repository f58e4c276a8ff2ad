//! Column-oriented analytical store
//!
//! The store offers no multi-statement transactions. Consistency comes from
//! writing into a staging table and swapping it into place, so the trait
//! exposes the swap primitives (existence check, rename, exchange) next to
//! plain statement execution and bulk insert.
//!
//! [`ClickHouseStore`] talks to the ClickHouse HTTP interface: the statement
//! goes in the `query` parameter and insert rows in the request body as
//! `JSONCompactEachRow`.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::ClickHouseConfig;
use crate::error::{IngestError, Result};

/// Column of an analytical table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Type as written in DDL, e.g. `Nullable(Decimal(18,2))`
    pub column_type: String,
    /// Fractional digits for decimal columns
    pub scale: Option<i64>,
}

/// Layout of a table to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub database: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Extra DDL lines appended after the columns
    pub trailing_columns: Vec<String>,
    pub engine: String,
    pub order_by: Vec<String>,
}

impl TableDefinition {
    pub fn create_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", c.name, c.column_type))
            .collect();
        lines.extend(self.trailing_columns.iter().map(|l| format!("    {l}")));

        format!(
            "CREATE TABLE {} (\n{}\n)\nENGINE = {}\nORDER BY ({})",
            qualified(&self.database, &self.name),
            lines.join(",\n"),
            self.engine,
            self.order_by.join(", ")
        )
    }
}

pub fn qualified(database: &str, table: &str) -> String {
    format!("{database}.{table}")
}

/// Analytical destination
///
/// Only [`execute`](Self::execute) and [`insert_rows`](Self::insert_rows)
/// are required; the DDL helpers default to plain statements.
#[async_trait]
pub trait AnalyticalStore: Send + Sync {
    /// Run one statement and return the raw response body
    async fn execute(&self, sql: &str) -> Result<String>;

    /// Append rows whose values follow `columns` order
    async fn insert_rows(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<serde_json::Value>],
    ) -> Result<u64>;

    async fn create_database(&self, database: &str) -> Result<()> {
        self.execute(&format!("CREATE DATABASE IF NOT EXISTS {database}"))
            .await
            .map(drop)
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        self.execute(&table.create_sql()).await.map(drop)
    }

    async fn drop_table_if_exists(&self, database: &str, table: &str) -> Result<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}", qualified(database, table)))
            .await
            .map(drop)
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        let body = self
            .execute(&format!("EXISTS TABLE {}", qualified(database, table)))
            .await?;
        Ok(body.trim() == "1")
    }

    async fn rename_table(&self, database: &str, from: &str, to: &str) -> Result<()> {
        self.execute(&format!(
            "RENAME TABLE {} TO {}",
            qualified(database, from),
            qualified(database, to)
        ))
        .await
        .map(drop)
    }

    /// Atomically swap the names of two existing tables
    async fn exchange_tables(&self, database: &str, left: &str, right: &str) -> Result<()> {
        self.execute(&format!(
            "EXCHANGE TABLES {} AND {}",
            qualified(database, left),
            qualified(database, right)
        ))
        .await
        .map(drop)
    }
}

/// ClickHouse over its HTTP interface
pub struct ClickHouseStore {
    client: Client,
    url: String,
    user: String,
    password: String,
}

impl ClickHouseStore {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    async fn post(&self, query: &str, body: String) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/", self.url))
            .query(&[("query", query)])
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "ClickHouse rejected statement");
            return Err(IngestError::Analytical {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl AnalyticalStore for ClickHouseStore {
    async fn execute(&self, sql: &str) -> Result<String> {
        debug!(sql = %sql.lines().next().unwrap_or_default(), "ClickHouse statement");
        self.post(sql, String::new()).await
    }

    async fn insert_rows(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<serde_json::Value>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "INSERT INTO {} ({}) FORMAT JSONCompactEachRow",
            qualified(database, table),
            columns.join(", ")
        );
        let mut body = String::new();
        for row in rows {
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }

        self.post(&query, body).await?;
        debug!(table, rows = rows.len(), "Inserted analytical rows");
        Ok(rows.len() as u64)
    }
}
