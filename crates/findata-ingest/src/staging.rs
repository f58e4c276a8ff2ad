//! Staging publish protocol
//!
//! A run writes its analytical rows into a private staging table and only
//! swaps it into the published name once everything is written. Readers of
//! the published table see either the previous snapshot or the new one.
//!
//! ```text
//! prepare:  CREATE DATABASE IF NOT EXISTS
//!           DROP TABLE IF EXISTS staging        (left over by a crashed run)
//!           CREATE TABLE staging
//! append:   INSERT INTO staging ...             (repeated per chunk)
//! publish:  EXISTS TABLE target
//!           EXCHANGE TABLES target AND staging  (target existed)
//!           RENAME TABLE staging TO target      (first publish)
//!           DROP TABLE IF EXISTS staging        (now holds the old snapshot)
//! ```
//!
//! Every target has exactly one staging name. Runs for a partition never
//! overlap, so whatever sits under that name at `prepare` time is debris from
//! a run that died and is safe to drop.

use std::sync::Arc;

use bigdecimal::RoundingMode;
use findata_common::{DatasetKind, LoanType, TenantCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::destination::analytical::{AnalyticalStore, ColumnDef, TableDefinition};
use crate::error::Result;
use crate::schema::SchemaRegistry;
use crate::validate::{NormalizedRecord, NormalizedValue};

const ENGINE: &str = "ReplacingMergeTree()";
const INSERTED_AT_COLUMN: &str = "created_at DateTime DEFAULT now()";

/// Per-tenant analytical database
pub fn database_name(prefix: &str, tenant: &TenantCode) -> String {
    format!("{prefix}{}", tenant.schema_key())
}

/// Published table for a dataset and loan type
pub fn target_table(dataset: DatasetKind, loan_type: LoanType) -> String {
    let base = match dataset {
        DatasetKind::Credit => "fact_loans_current",
        DatasetKind::PaymentPlan => "fact_payment_plan_current",
    };
    format!("{base}_{}", loan_type.table_suffix())
}

pub fn staging_table(target: &str) -> String {
    format!("{target}_staging")
}

/// Staging table of one run
pub struct StagingTable {
    store: Arc<dyn AnalyticalStore>,
    database: String,
    target: String,
    name: String,
    columns: Vec<ColumnDef>,
    order_by: Vec<String>,
    rows_written: u64,
}

impl StagingTable {
    pub fn new(
        store: Arc<dyn AnalyticalStore>,
        registry: &SchemaRegistry,
        database: String,
        dataset: DatasetKind,
        loan_type: LoanType,
    ) -> Result<Self> {
        let target = target_table(dataset, loan_type);
        Ok(Self {
            store,
            database,
            name: staging_table(&target),
            target,
            columns: registry.analytical_columns(dataset)?,
            order_by: registry
                .order_by(dataset)
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            rows_written: 0,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn definition(&self) -> TableDefinition {
        TableDefinition {
            database: self.database.clone(),
            name: self.name.clone(),
            columns: self.columns.clone(),
            trailing_columns: vec![INSERTED_AT_COLUMN.to_string()],
            engine: ENGINE.to_string(),
            order_by: self.order_by.clone(),
        }
    }

    /// Create the database and a fresh staging table
    pub async fn prepare(&self) -> Result<()> {
        self.store.create_database(&self.database).await?;
        self.store
            .drop_table_if_exists(&self.database, &self.name)
            .await?;
        self.store.create_table(&self.definition()).await?;
        debug!(database = %self.database, table = %self.name, "Staging table ready");
        Ok(())
    }

    /// Append stamped records in column order
    pub async fn append(&mut self, records: &[NormalizedRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let columns: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        let rows: Vec<Vec<Value>> = records.iter().map(|r| self.encode(r)).collect();
        let written = self
            .store
            .insert_rows(&self.database, &self.name, &columns, &rows)
            .await?;
        self.rows_written += written;
        Ok(written)
    }

    /// Drop the staging table of a run that will not publish
    ///
    /// Failures are only logged: the next `prepare` drops the table anyway.
    pub async fn discard(&self) {
        if let Err(e) = self
            .store
            .drop_table_if_exists(&self.database, &self.name)
            .await
        {
            warn!(
                database = %self.database,
                table = %self.name,
                error = %e,
                "Failed to drop staging table"
            );
        }
    }

    /// Swap the staging table into the published name
    pub async fn publish(self) -> Result<()> {
        let Self {
            store,
            database,
            target,
            name,
            rows_written,
            ..
        } = self;

        let existed = store.table_exists(&database, &target).await?;
        if existed {
            store.exchange_tables(&database, &target, &name).await?;
        } else {
            store.rename_table(&database, &name, &target).await?;
        }
        store.drop_table_if_exists(&database, &name).await?;

        info!(
            database = %database,
            table = %target,
            rows = rows_written,
            swapped = existed,
            "Published analytical snapshot"
        );
        Ok(())
    }

    fn encode(&self, record: &NormalizedRecord) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| match column.name.as_str() {
                "batch_id" => record
                    .batch_id
                    .map(|id| Value::String(id.to_string()))
                    .unwrap_or(Value::Null),
                "loan_type" => record
                    .loan_type
                    .map(|l| Value::String(l.as_str().to_string()))
                    .unwrap_or(Value::Null),
                name => encode_value(record.get(name), column.scale),
            })
            .collect()
    }
}

/// JSON form of a value for `JSONCompactEachRow`
///
/// Decimals travel as strings rounded to the column scale so no precision is
/// lost through floating point.
pub fn encode_value(value: &NormalizedValue, scale: Option<i64>) -> Value {
    match value {
        NormalizedValue::Null => Value::Null,
        NormalizedValue::Text(s) => Value::String(s.clone()),
        NormalizedValue::Int(i) => match scale {
            Some(_) => Value::String(i.to_string()),
            None => Value::from(*i),
        },
        NormalizedValue::Decimal(d) => {
            let d = match scale {
                Some(scale) => d.with_scale_round(scale, RoundingMode::HalfEven),
                None => d.clone(),
            };
            Value::String(d.to_string())
        }
        NormalizedValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        NormalizedValue::Category(c) => Value::String(c.as_str().to_string()),
    }
}
