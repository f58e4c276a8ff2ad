//! Ingestion orchestrator
//!
//! One run moves a whole `(tenant, loan type, dataset)` partition from the
//! source into both destinations, or moves nothing:
//!
//! 1. Parse the discriminators and open the batch (input errors stop here)
//! 2. PROCESSING; count the source rows; an empty source succeeds at once
//! 3. Dry pass: validate every row without writing anywhere
//! 4. Any invalid row: store the errors, FAILED_VALIDATION, return `false`
//! 5. Load pass: inside one relational transaction, clear the partition and
//!    re-read the source, flushing relational rows and staging rows in chunks
//! 6. Commit, publish the staging table, SUCCESS
//!
//! Any error after the batch is open marks it FAILED and is returned.

use std::sync::Arc;

use findata_common::{DatasetKind, LoanType, TenantCode};
use futures::TryStreamExt;
use tracing::{debug, error, info, info_span, Instrument};

use crate::batch::{Batch, BatchStatus, BatchStore, BatchTracker};
use crate::config::{LoadConfig, DEFAULT_CLICKHOUSE_DATABASE_PREFIX};
use crate::destination::analytical::AnalyticalStore;
use crate::destination::relational::{Ownership, RelationalRecord, RelationalStore};
use crate::error::{IngestError, Result};
use crate::schema::{FieldSpec, SchemaRegistry};
use crate::source::{SourceProvider, SourceScope};
use crate::staging::{database_name, StagingTable};
use crate::validate::{KeyTracker, RowCheck, RowValidator, ValidationError};

/// Outcome of the dry validation pass
#[derive(Debug, Default)]
struct DryRun {
    valid_rows: i64,
    invalid_rows: i64,
    errors: Vec<ValidationError>,
}

/// Coordinates one ingestion run across the source, both destinations and
/// the batch record
pub struct IngestionOrchestrator {
    registry: Arc<SchemaRegistry>,
    source: Arc<dyn SourceProvider>,
    relational: Arc<dyn RelationalStore>,
    analytical: Arc<dyn AnalyticalStore>,
    batches: Arc<dyn BatchStore>,
    load: LoadConfig,
    database_prefix: String,
}

impl IngestionOrchestrator {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        relational: Arc<dyn RelationalStore>,
        analytical: Arc<dyn AnalyticalStore>,
        batches: Arc<dyn BatchStore>,
    ) -> Self {
        Self {
            registry: Arc::new(SchemaRegistry::new()),
            source,
            relational,
            analytical,
            batches,
            load: LoadConfig::default(),
            database_prefix: DEFAULT_CLICKHOUSE_DATABASE_PREFIX.to_string(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_load_config(mut self, load: LoadConfig) -> Self {
        self.load = load;
        self
    }

    pub fn with_database_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database_prefix = prefix.into();
        self
    }

    /// Run an ingestion and report whether the data was loaded
    ///
    /// `Ok(false)` means the batch ended in FAILED_VALIDATION.
    pub async fn run(
        &self,
        tenant: &str,
        loan_type: &str,
        dataset: Option<&str>,
        batch_id: Option<uuid::Uuid>,
    ) -> Result<bool> {
        let batch = self.run_batch(tenant, loan_type, dataset, batch_id).await?;
        Ok(batch.status == BatchStatus::Success)
    }

    /// Same as [`run`](Self::run), returning the final batch record
    pub async fn run_batch(
        &self,
        tenant: &str,
        loan_type: &str,
        dataset: Option<&str>,
        batch_id: Option<uuid::Uuid>,
    ) -> Result<Batch> {
        let tenant = TenantCode::parse(tenant)?;
        let loan_type: LoanType = loan_type.parse()?;
        let dataset = DatasetKind::parse_or_default(dataset)?;
        let fields = self.registry.schema_for(dataset)?;

        let mut tracker =
            BatchTracker::open(self.batches.clone(), &tenant, loan_type, batch_id).await?;

        let span = info_span!(
            "ingest",
            tenant = %tenant,
            loan_type = %loan_type,
            dataset = %dataset,
            batch_id = %tracker.id(),
        );

        async {
            info!("Ingestion started");
            match self
                .execute(&mut tracker, &tenant, loan_type, dataset, fields)
                .await
            {
                Ok(()) => Ok(tracker.batch().clone()),
                Err(err) => {
                    error!(error = %err, "Ingestion failed");
                    if let Err(fail_err) = tracker.fail(&err).await {
                        error!(error = %fail_err, "Could not mark batch as failed");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        tracker: &mut BatchTracker,
        tenant: &TenantCode,
        loan_type: LoanType,
        dataset: DatasetKind,
        fields: &[FieldSpec],
    ) -> Result<()> {
        tracker.begin_processing().await?;

        let scope = SourceScope::new(tenant, loan_type, dataset);
        if let Some(version) = self.source.dataset_version(&scope).await? {
            info!(version = %version, "Source dataset version");
        }

        let total = self.source.count(&scope).await?;
        tracker.record_total(total as i64).await?;
        if total == 0 {
            return tracker.succeed_empty().await;
        }

        let known_loan_ids = match dataset {
            DatasetKind::PaymentPlan => {
                let ids = self.source.credit_ids(&scope.source_id, loan_type).await?;
                debug!(loan_ids = ids.len(), "Loaded credit ids for reference check");
                Some(ids)
            }
            DatasetKind::Credit => None,
        };
        let validator = RowValidator::new(fields, known_loan_ids.as_ref());

        let dry = self.dry_run(&scope, &validator).await?;
        info!(
            valid_rows = dry.valid_rows,
            invalid_rows = dry.invalid_rows,
            "Dry validation pass complete"
        );
        tracker
            .record_validation(dry.valid_rows, dry.invalid_rows)
            .await?;
        if dry.invalid_rows > 0 {
            return tracker.fail_validation(&dry.errors).await;
        }

        let loaded = self
            .load_pass(tracker, tenant, &scope, &validator)
            .await?;
        tracker.succeed(loaded as i64).await
    }

    /// Validate every source row without touching a destination
    async fn dry_run(&self, scope: &SourceScope, validator: &RowValidator<'_>) -> Result<DryRun> {
        let mut dry = DryRun::default();
        let mut keys = KeyTracker::new(self.registry.natural_key(scope.dataset));
        let mut rows = self.source.rows(scope);
        let mut row_number = 0u64;

        while let Some(row) = rows.try_next().await? {
            row_number += 1;
            let mut check = validator.check(&row.payload);
            check
                .violations
                .extend(keys.observe(&check.record, row_number));
            if check.is_valid() {
                dry.valid_rows += 1;
            } else {
                dry.invalid_rows += 1;
                dry.errors.extend(check.to_errors(row_number, &row.payload));
            }
        }

        Ok(dry)
    }

    /// Replace the relational partition and publish a fresh analytical
    /// snapshot
    ///
    /// A run that fails before publishing drops its staging table; if that
    /// drop fails too, the next run for the partition drops it in `prepare`.
    async fn load_pass(
        &self,
        tracker: &BatchTracker,
        tenant: &TenantCode,
        scope: &SourceScope,
        validator: &RowValidator<'_>,
    ) -> Result<u64> {
        let mut staging = StagingTable::new(
            self.analytical.clone(),
            &self.registry,
            database_name(&self.database_prefix, tenant),
            scope.dataset,
            scope.loan_type,
        )?;
        staging.prepare().await?;

        match self.load_rows(tracker, scope, validator, &mut staging).await {
            Ok(loaded) => {
                staging.publish().await?;
                Ok(loaded)
            }
            Err(e) => {
                staging.discard().await;
                Err(e)
            }
        }
    }

    /// Clear the partition and re-read the source into both destinations
    ///
    /// The relational transaction is dropped, and so rolled back, on any
    /// error. It commits only after every row reached staging.
    async fn load_rows(
        &self,
        tracker: &BatchTracker,
        scope: &SourceScope,
        validator: &RowValidator<'_>,
        staging: &mut StagingTable,
    ) -> Result<u64> {
        let batch_id = tracker.id();
        let owner = Ownership {
            tenant_id: tracker.batch().tenant_id,
            batch_id,
            loan_type: scope.loan_type,
        };
        let chunk_size = self.load.chunk_size;

        let mut tx = self.relational.begin().await?;
        let deleted = tx
            .delete_partition(owner.tenant_id, scope.loan_type, scope.dataset)
            .await?;
        info!(deleted, "Cleared relational partition");

        let mut relational_rows = Vec::with_capacity(chunk_size);
        let mut analytical_rows = Vec::with_capacity(chunk_size);
        let mut loaded = 0u64;
        let mut keys = KeyTracker::new(self.registry.natural_key(scope.dataset));
        let mut row_number = 0u64;
        let mut rows = self.source.rows(scope);

        while let Some(row) = rows.try_next().await? {
            row_number += 1;
            let RowCheck {
                mut record,
                mut violations,
            } = validator.check(&row.payload);
            violations.extend(keys.observe(&record, row_number));
            if !violations.is_empty() {
                let reason = violations
                    .iter()
                    .map(|v| v.kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(IngestError::SourceChanged {
                    row: row_number,
                    reason,
                });
            }

            let relational =
                RelationalRecord::from_record(scope.dataset, owner, &record, &row.payload)
                    .ok_or_else(|| IngestError::SourceChanged {
                        row: row_number,
                        reason: "required column is null".to_string(),
                    })?;
            record.stamp(batch_id, scope.loan_type);
            relational_rows.push(relational);
            analytical_rows.push(record);
            loaded += 1;

            if relational_rows.len() >= chunk_size {
                let written = tx.insert(&relational_rows).await?;
                debug!(rows = written, loaded, "Flushed relational chunk");
                relational_rows.clear();
            }
            if analytical_rows.len() >= chunk_size {
                let written = staging.append(&analytical_rows).await?;
                debug!(rows = written, loaded, "Flushed analytical chunk");
                analytical_rows.clear();
            }
        }
        drop(rows);

        if !relational_rows.is_empty() {
            let written = tx.insert(&relational_rows).await?;
            debug!(rows = written, loaded, "Flushed relational remainder");
        }
        if !analytical_rows.is_empty() {
            let written = staging.append(&analytical_rows).await?;
            debug!(rows = written, loaded, "Flushed analytical remainder");
        }

        tx.commit().await?;
        info!(rows = loaded, "Relational load committed");
        Ok(loaded)
    }
}
