//! Batch state machine
//!
//! [`BatchTracker`] owns the in-memory copy of a run's batch and is the only
//! code that changes its status. Status changes are checked against the state
//! machine and applied in memory only after the touched columns are saved.

use std::sync::Arc;

use chrono::Utc;
use findata_common::{LoanType, TenantCode};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{Batch, BatchField, BatchStatus};
use super::store::BatchStore;
use crate::error::{IngestError, Result};
use crate::validate::ValidationError;

pub struct BatchTracker {
    store: Arc<dyn BatchStore>,
    batch: Batch,
}

impl BatchTracker {
    /// Create a new batch for the tenant, or adopt an existing STARTED one
    ///
    /// Nothing is written when the tenant, the batch, or its state is wrong.
    pub async fn open(
        store: Arc<dyn BatchStore>,
        tenant: &TenantCode,
        loan_type: LoanType,
        existing: Option<Uuid>,
    ) -> Result<Self> {
        let mut batch = match existing {
            Some(id) => {
                let batch = store.load(id).await?.ok_or(IngestError::BatchNotFound(id))?;
                if &batch.tenant_code != tenant {
                    return Err(IngestError::InvalidArgument(format!(
                        "batch {id} does not belong to tenant {tenant}"
                    )));
                }
                if batch.status != BatchStatus::Started {
                    return Err(IngestError::IllegalTransition {
                        from: batch.status,
                        to: BatchStatus::Processing,
                    });
                }
                batch
            }
            None => {
                let record = store
                    .find_tenant(tenant)
                    .await?
                    .ok_or_else(|| IngestError::TenantNotFound(tenant.to_string()))?;
                store.create(&record, loan_type).await?
            }
        };
        batch.loan_type = Some(loan_type);

        Ok(Self { store, batch })
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn id(&self) -> Uuid {
        self.batch.id
    }

    pub fn status(&self) -> BatchStatus {
        self.batch.status
    }

    /// Apply a status change; the in-memory batch only changes once saved
    async fn transition<F>(&mut self, next: BatchStatus, fields: &[BatchField], update: F) -> Result<()>
    where
        F: FnOnce(&mut Batch),
    {
        if !self.batch.status.can_transition_to(next) {
            return Err(IngestError::IllegalTransition {
                from: self.batch.status,
                to: next,
            });
        }

        let mut staged = self.batch.clone();
        staged.status = next;
        if next.is_terminal() {
            staged.completed_at = Some(Utc::now());
        }
        update(&mut staged);

        self.store.save_fields(&staged, fields).await?;
        self.batch = staged;
        Ok(())
    }

    /// STARTED -> PROCESSING; keeps an earlier `started_at`
    pub async fn begin_processing(&mut self) -> Result<()> {
        self.transition(
            BatchStatus::Processing,
            &[BatchField::Status, BatchField::StartedAt, BatchField::LoanType],
            |batch| {
                batch.started_at.get_or_insert_with(Utc::now);
            },
        )
        .await?;
        info!(batch_id = %self.batch.id, "Batch processing");
        Ok(())
    }

    pub async fn record_total(&mut self, total_rows: i64) -> Result<()> {
        self.record(&[BatchField::TotalRows], |batch| batch.total_rows = total_rows)
            .await
    }

    pub async fn record_validation(&mut self, valid_rows: i64, invalid_rows: i64) -> Result<()> {
        self.record(&[BatchField::ValidRows, BatchField::InvalidRows], |batch| {
            batch.valid_rows = valid_rows;
            batch.invalid_rows = invalid_rows;
        })
        .await
    }

    /// Save counters of a batch that is still open
    async fn record<F>(&mut self, fields: &[BatchField], update: F) -> Result<()>
    where
        F: FnOnce(&mut Batch),
    {
        if self.batch.status.is_terminal() {
            return Err(IngestError::BatchClosed {
                id: self.batch.id,
                status: self.batch.status,
            });
        }

        let mut staged = self.batch.clone();
        update(&mut staged);
        self.store.save_fields(&staged, fields).await?;
        self.batch = staged;
        Ok(())
    }

    /// Terminal SUCCESS with the number of loaded rows
    pub async fn succeed(&mut self, record_count: i64) -> Result<()> {
        self.transition(
            BatchStatus::Success,
            &[BatchField::Status, BatchField::RecordCount, BatchField::CompletedAt],
            |batch| batch.record_count = record_count,
        )
        .await?;
        info!(batch_id = %self.batch.id, records = record_count, "Batch succeeded");
        Ok(())
    }

    /// Terminal SUCCESS for an empty source dataset
    pub async fn succeed_empty(&mut self) -> Result<()> {
        self.transition(
            BatchStatus::Success,
            &[
                BatchField::Status,
                BatchField::CompletedAt,
                BatchField::RecordCount,
                BatchField::ValidRows,
                BatchField::InvalidRows,
            ],
            |batch| {
                batch.record_count = 0;
                batch.valid_rows = 0;
                batch.invalid_rows = 0;
            },
        )
        .await?;
        info!(batch_id = %self.batch.id, "Source dataset empty, batch succeeded");
        Ok(())
    }

    /// Persist row errors, then terminal FAILED_VALIDATION
    pub async fn fail_validation(&mut self, errors: &[ValidationError]) -> Result<()> {
        if !self.batch.status.can_transition_to(BatchStatus::FailedValidation) {
            return Err(IngestError::IllegalTransition {
                from: self.batch.status,
                to: BatchStatus::FailedValidation,
            });
        }
        let written = self.store.insert_errors(self.batch.id, errors).await?;
        debug!(batch_id = %self.batch.id, errors = written, "Validation errors stored");

        let message = format!("Validation failed for {} rows.", self.batch.invalid_rows);
        self.transition(
            BatchStatus::FailedValidation,
            &[BatchField::Status, BatchField::ErrorMessage, BatchField::CompletedAt],
            |batch| batch.error_message = Some(message),
        )
        .await?;
        info!(
            batch_id = %self.batch.id,
            invalid_rows = self.batch.invalid_rows,
            "Batch failed validation"
        );
        Ok(())
    }

    /// Terminal FAILED carrying the error text
    pub async fn fail(&mut self, error: &IngestError) -> Result<()> {
        let message = format!("System Error: {error}");
        self.transition(
            BatchStatus::Failed,
            &[BatchField::Status, BatchField::ErrorMessage, BatchField::CompletedAt],
            |batch| batch.error_message = Some(message),
        )
        .await
    }
}
