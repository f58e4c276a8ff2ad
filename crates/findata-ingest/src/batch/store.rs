//! Batch persistence
//!
//! The batch row is the only channel through which progress and outcome are
//! visible to external pollers, so every phase saves exactly the columns it
//! changed.

use async_trait::async_trait;
use findata_common::{LoanType, TenantCode};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use super::models::{Batch, BatchField, BatchStatus, Tenant};
use crate::config::DEFAULT_ERROR_CHUNK_SIZE;
use crate::error::Result;
use crate::validate::{ErrorKind, ValidationError};

/// Storage of batches, tenants and row-level errors
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Case-insensitive lookup by tenant code
    async fn find_tenant(&self, code: &TenantCode) -> Result<Option<Tenant>>;

    /// Insert a new STARTED batch
    async fn create(&self, tenant: &Tenant, loan_type: LoanType) -> Result<Batch>;

    async fn load(&self, id: Uuid) -> Result<Option<Batch>>;

    /// Persist only the named columns of `batch`
    async fn save_fields(&self, batch: &Batch, fields: &[BatchField]) -> Result<()>;

    /// Persist row-level errors, returning how many were written
    async fn insert_errors(&self, batch_id: Uuid, errors: &[ValidationError]) -> Result<u64>;

    /// Errors ordered by row number
    async fn list_errors(&self, batch_id: Uuid, limit: Option<i64>) -> Result<Vec<ValidationError>>;
}

/// Postgres-backed batch store
#[derive(Clone)]
pub struct PgBatchStore {
    pool: PgPool,
    error_chunk_size: usize,
}

impl PgBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            error_chunk_size: DEFAULT_ERROR_CHUNK_SIZE,
        }
    }

    pub fn with_error_chunk_size(mut self, size: usize) -> Self {
        self.error_chunk_size = size.max(1);
        self
    }
}

const BATCH_COLUMNS: &str = r#"
    b.id, b.tenant_id, t.tenant_code, b.loan_type, b.status,
    b.total_rows, b.valid_rows, b.invalid_rows, b.record_count,
    b.started_at, b.completed_at, b.error_message, b.created_at
"#;

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn batch_from_row(row: &PgRow) -> Result<Batch> {
    let status: String = row.try_get("status")?;
    let loan_type: Option<String> = row.try_get("loan_type")?;
    let tenant_code: String = row.try_get("tenant_code")?;

    Ok(Batch {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        tenant_code: TenantCode::parse(&tenant_code)?,
        loan_type: loan_type.map(|l| l.parse::<LoanType>()).transpose()?,
        status: status.parse::<BatchStatus>().map_err(decode_error)?,
        total_rows: row.try_get("total_rows")?,
        valid_rows: row.try_get("valid_rows")?,
        invalid_rows: row.try_get("invalid_rows")?,
        record_count: row.try_get("record_count")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn find_tenant(&self, code: &TenantCode) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, tenant_code
            FROM tenants
            WHERE UPPER(tenant_code) = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Tenant> {
            let code: String = row.try_get("tenant_code")?;
            Ok(Tenant {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                code: TenantCode::parse(&code)?,
            })
        })
        .transpose()
    }

    async fn create(&self, tenant: &Tenant, loan_type: LoanType) -> Result<Batch> {
        let batch = Batch::new(tenant, loan_type);

        sqlx::query(
            r#"
            INSERT INTO batches (id, tenant_id, loan_type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(batch.id)
        .bind(batch.tenant_id)
        .bind(loan_type.as_str())
        .bind(batch.status.as_str())
        .bind(batch.created_at)
        .execute(&self.pool)
        .await?;

        debug!(batch_id = %batch.id, tenant = %tenant.code, "Created batch");
        Ok(batch)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Batch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches b JOIN tenants t ON t.id = b.tenant_id WHERE b.id = $1"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn save_fields(&self, batch: &Batch, fields: &[BatchField]) -> Result<()> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE batches SET ");
        let mut assignments = query_builder.separated(", ");

        for field in fields {
            assignments.push(format!("{} = ", field.column()));
            match field {
                BatchField::Status => assignments.push_bind_unseparated(batch.status.as_str()),
                BatchField::LoanType => {
                    assignments.push_bind_unseparated(batch.loan_type.map(|l| l.as_str()))
                }
                BatchField::TotalRows => assignments.push_bind_unseparated(batch.total_rows),
                BatchField::ValidRows => assignments.push_bind_unseparated(batch.valid_rows),
                BatchField::InvalidRows => assignments.push_bind_unseparated(batch.invalid_rows),
                BatchField::RecordCount => assignments.push_bind_unseparated(batch.record_count),
                BatchField::StartedAt => assignments.push_bind_unseparated(batch.started_at),
                BatchField::CompletedAt => assignments.push_bind_unseparated(batch.completed_at),
                BatchField::ErrorMessage => {
                    assignments.push_bind_unseparated(batch.error_message.clone())
                }
            };
        }
        assignments.push("updated_at = NOW()");

        query_builder.push(" WHERE id = ").push_bind(batch.id);
        query_builder.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn insert_errors(&self, batch_id: Uuid, errors: &[ValidationError]) -> Result<u64> {
        if errors.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in errors.chunks(self.error_chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO batch_errors (
                    batch_id, row_number, error_code, field_name, message, raw_excerpt
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, error| {
                b.push_bind(batch_id)
                    .push_bind(error.row_number as i64)
                    .push_bind(error.kind.as_str())
                    .push_bind(error.field.clone())
                    .push_bind(error.message.clone())
                    .push_bind(error.raw.clone());
            });

            written += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(batch_id = %batch_id, errors = written, "Persisted validation errors");
        Ok(written)
    }

    async fn list_errors(&self, batch_id: Uuid, limit: Option<i64>) -> Result<Vec<ValidationError>> {
        let rows = sqlx::query(
            r#"
            SELECT row_number, error_code, field_name, message, raw_excerpt
            FROM batch_errors
            WHERE batch_id = $1
            ORDER BY row_number, id
            LIMIT $2
            "#,
        )
        .bind(batch_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let code: String = row.try_get("error_code")?;
                let row_number: i64 = row.try_get("row_number")?;
                Ok(ValidationError {
                    row_number: row_number.max(0) as u64,
                    kind: code.parse::<ErrorKind>().map_err(decode_error)?,
                    field: row.try_get("field_name")?,
                    message: row.try_get("message")?,
                    raw: row.try_get("raw_excerpt")?,
                })
            })
            .collect()
    }
}
