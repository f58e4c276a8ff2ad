//! Source tables on PostgreSQL
//!
//! Rows are paged by keyset on the surrogate id (`id > last ORDER BY id
//! LIMIT n`), so only one fetch window is held in memory at a time.

use std::collections::HashSet;

use async_trait::async_trait;
use findata_common::{DatasetKind, LoanType};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{SourceProvider, SourceRow, SourceScope};
use crate::config::DEFAULT_FETCH_SIZE;
use crate::error::{IngestError, Result};
use crate::raw::RawRow;

#[derive(Clone)]
pub struct PgSourceProvider {
    pool: PgPool,
    fetch_size: usize,
}

impl PgSourceProvider {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    fn page_sql(dataset: DatasetKind) -> &'static str {
        match dataset {
            DatasetKind::Credit => {
                r#"
                SELECT id, external_id, NULL::BIGINT AS installment_number, payload
                FROM source_loans
                WHERE bank_code = $1 AND loan_type = $2 AND id > $3
                ORDER BY id
                LIMIT $4
                "#
            }
            DatasetKind::PaymentPlan => {
                r#"
                SELECT id, loan_external_id AS external_id, installment_number, payload
                FROM source_payment_plans
                WHERE bank_code = $1 AND loan_type = $2 AND id > $3
                ORDER BY id
                LIMIT $4
                "#
            }
        }
    }

    async fn fetch_page(&self, scope: &SourceScope, after: i64) -> Result<Vec<SourceRow>> {
        let rows = sqlx::query(Self::page_sql(scope.dataset))
            .bind(&scope.source_id)
            .bind(scope.loan_type.as_str())
            .bind(after)
            .bind(self.fetch_size as i64)
            .fetch_all(&self.pool)
            .await?;

        let page = rows
            .iter()
            .map(|row| -> Result<SourceRow> {
                let payload: Option<serde_json::Value> = row.try_get("payload")?;
                Ok(SourceRow {
                    id: row.try_get("id")?,
                    external_id: row.try_get("external_id")?,
                    installment_number: row.try_get("installment_number")?,
                    payload: payload.as_ref().map(RawRow::from_json).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(after, rows = page.len(), dataset = %scope.dataset, "Fetched source page");
        Ok(page)
    }
}

#[async_trait]
impl SourceProvider for PgSourceProvider {
    async fn count(&self, scope: &SourceScope) -> Result<u64> {
        let table = match scope.dataset {
            DatasetKind::Credit => "source_loans",
            DatasetKind::PaymentPlan => "source_payment_plans",
        };
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE bank_code = $1 AND loan_type = $2");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&scope.source_id)
            .bind(scope.loan_type.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    fn rows<'a>(&'a self, scope: &'a SourceScope) -> BoxStream<'a, Result<SourceRow>> {
        // None as the state marks the last page as consumed
        stream::try_unfold(Some(0i64), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok::<_, IngestError>(None);
            };
            let page = self.fetch_page(scope, after).await?;
            if page.is_empty() {
                return Ok(None);
            }
            let next = if page.len() < self.fetch_size {
                None
            } else {
                page.last().map(|row| row.id)
            };
            Ok(Some((stream::iter(page.into_iter().map(Ok::<_, IngestError>)), next)))
        })
        .try_flatten()
        .boxed()
    }

    async fn credit_ids(&self, source_id: &str, loan_type: LoanType) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT external_id FROM source_loans WHERE bank_code = $1 AND loan_type = $2",
        )
        .bind(source_id)
        .bind(loan_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn dataset_version(&self, scope: &SourceScope) -> Result<Option<String>> {
        let version: Option<String> = sqlx::query_scalar(
            r#"
            SELECT dataset_version
            FROM source_dataset_state
            WHERE bank_code = $1 AND loan_type = $2 AND dataset_type = $3
            LIMIT 1
            "#,
        )
        .bind(&scope.source_id)
        .bind(scope.loan_type.as_str())
        .bind(scope.dataset.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }
}
