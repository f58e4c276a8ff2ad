//! End-to-end ingestion runs against the in-memory backends
//!
//! Covers the run outcomes and their effect on both destinations:
//! - successful CREDIT and PAYMENT_PLAN loads
//! - validation failures leaving every destination untouched
//! - empty sources, chunked flushing, republishing
//! - infrastructure failures and their rollback

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use findata_common::{DatasetKind, LoanType};
use findata_ingest::batch::{Batch, BatchStatus, BatchStore, Tenant};
use findata_ingest::config::LoadConfig;
use findata_ingest::destination::relational::{LoanRow, RelationalRecord};
use findata_ingest::memory::{
    scope, MemoryAnalytical, MemoryBatchStore, MemoryRelational, MemorySource,
};
use findata_ingest::raw::RawRow;
use findata_ingest::{ErrorKind, IngestError, IngestionOrchestrator, SchemaRegistry};
use serde_json::json;
use uuid::Uuid;

const DATABASE: &str = "dwh_bank001";
const LOANS_TABLE: &str = "fact_loans_current_retail";
const PLANS_TABLE: &str = "fact_payment_plan_current_retail";

struct Harness {
    source: Arc<MemorySource>,
    relational: MemoryRelational,
    analytical: MemoryAnalytical,
    batches: Arc<MemoryBatchStore>,
    tenant: Tenant,
}

impl Harness {
    async fn new() -> Self {
        let batches = Arc::new(MemoryBatchStore::new());
        let tenant = batches.add_tenant("BANK001", "First Bank").await.unwrap();
        Self {
            source: Arc::new(MemorySource::new()),
            relational: MemoryRelational::new(),
            analytical: MemoryAnalytical::new(),
            batches,
            tenant,
        }
    }

    fn orchestrator(&self) -> IngestionOrchestrator {
        IngestionOrchestrator::new(
            self.source.clone(),
            Arc::new(self.relational.clone()),
            Arc::new(self.analytical.clone()),
            self.batches.clone(),
        )
    }

    async fn run(&self, dataset: Option<&str>) -> Result<Batch, IngestError> {
        self.orchestrator()
            .run_batch("bank001", "retail", dataset, None)
            .await
    }

    async fn existing_batch(&self) -> Uuid {
        self.batches
            .create(&self.tenant, LoanType::Retail)
            .await
            .unwrap()
            .id
    }

    async fn add_credit(&self, row: RawRow) {
        self.source.add_credit("BANK001", LoanType::Retail, row).await;
    }

    async fn add_plan(&self, row: RawRow) {
        self.source
            .add_payment_plan("BANK001", LoanType::Retail, row)
            .await;
    }

    fn previous_loan(&self, external_id: &str, loan_type: LoanType) -> RelationalRecord {
        RelationalRecord::Loan(LoanRow {
            tenant_id: self.tenant.id,
            external_id: external_id.to_string(),
            loan_type,
            amount: BigDecimal::from(1),
            interest_rate: BigDecimal::from(0),
            customer_name: "Customer".to_string(),
            is_active: true,
            batch_id: Uuid::new_v4(),
        })
    }
}

fn credit(id: &str) -> RawRow {
    RawRow::new()
        .with("loan_account_number", id)
        .with("customer_id", format!("C-{id}"))
        .with("loan_status_code", "aktif")
        .with("loan_start_date", "15.01.2025")
        .with("original_loan_amount", "1 000,50")
        .with("nominal_interest_rate", "%2.5")
}

fn plan(loan: &str, installment: i64) -> RawRow {
    RawRow::new()
        .with("loan_account_number", loan)
        .with("installment_number", installment)
        .with("scheduled_payment_date", "2025-02-15")
        .with("installment_amount", "250.755")
}

fn external_ids(rows: &[RelationalRecord]) -> Vec<String> {
    rows.iter()
        .map(|r| match r {
            RelationalRecord::Loan(l) => l.external_id.clone(),
            RelationalRecord::PaymentPlan(p) => {
                format!("{}#{}", p.loan_external_id, p.installment_number)
            }
        })
        .collect()
}

fn column(dataset: DatasetKind, name: &str) -> usize {
    SchemaRegistry::new()
        .analytical_columns(dataset)
        .unwrap()
        .iter()
        .position(|c| c.name == name)
        .unwrap()
}

// ============================================================================
// Successful runs
// ============================================================================

#[tokio::test]
async fn test_credit_run_loads_both_destinations() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;
    h.add_credit(credit("L2")).await;

    let batch = h.run(None).await.unwrap();

    assert_eq!(batch.status, BatchStatus::Success);
    assert_eq!(batch.total_rows, 2);
    assert_eq!(batch.valid_rows, 2);
    assert_eq!(batch.invalid_rows, 0);
    assert_eq!(batch.record_count, 2);
    assert!(batch.started_at.is_some());
    assert!(batch.completed_at.is_some());
    assert!(batch.error_message.is_none());

    let stored = h.batches.load(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Success);
    assert_eq!(stored.record_count, 2);

    let rows = h.relational.rows().await;
    assert_eq!(external_ids(&rows), vec!["L1", "L2"]);
    let RelationalRecord::Loan(loan) = &rows[0] else {
        panic!("expected a loan row");
    };
    assert_eq!(loan.tenant_id, h.tenant.id);
    assert_eq!(loan.batch_id, batch.id);
    assert_eq!(loan.amount, BigDecimal::from_str("1000.50").unwrap());
    assert_eq!(loan.interest_rate, BigDecimal::from_str("0.025").unwrap());
    assert_eq!(loan.customer_name, "C-L1");
    assert!(loan.is_active);

    let published = h.analytical.table_rows(DATABASE, LOANS_TABLE).await.unwrap();
    assert_eq!(published.len(), 2);
    let row = &published[0];
    assert_eq!(row[column(DatasetKind::Credit, "loan_account_number")], json!("L1"));
    assert_eq!(row[column(DatasetKind::Credit, "loan_status_code")], json!("ACTIVE"));
    assert_eq!(row[column(DatasetKind::Credit, "loan_start_date")], json!("2025-01-15"));
    assert_eq!(row[column(DatasetKind::Credit, "original_loan_amount")], json!("1000.50"));
    assert_eq!(row[column(DatasetKind::Credit, "nominal_interest_rate")], json!("0.025000"));
    assert_eq!(row[column(DatasetKind::Credit, "batch_id")], json!(batch.id.to_string()));
    assert_eq!(row[column(DatasetKind::Credit, "loan_type")], json!("RETAIL"));

    assert_eq!(h.analytical.table_names(DATABASE).await, vec![LOANS_TABLE]);
}

#[tokio::test]
async fn test_publish_statement_order_on_first_run() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;

    h.run(Some("CREDIT")).await.unwrap();
    let staging = format!("{DATABASE}.{LOANS_TABLE}_staging");

    let statements = h.analytical.statements().await;
    assert_eq!(
        statements,
        vec![
            format!("CREATE DATABASE IF NOT EXISTS {DATABASE}"),
            format!("DROP TABLE IF EXISTS {staging}"),
            format!("CREATE TABLE {staging} ("),
            format!("INSERT INTO {staging}"),
            format!("EXISTS TABLE {DATABASE}.{LOANS_TABLE}"),
            format!("RENAME TABLE {staging} TO {DATABASE}.{LOANS_TABLE}"),
            format!("DROP TABLE IF EXISTS {staging}"),
        ]
    );
}

#[tokio::test]
async fn test_rerun_replaces_partition_and_exchanges() {
    let h = Harness::new().await;
    h.relational
        .seed(vec![
            h.previous_loan("OLD", LoanType::Retail),
            h.previous_loan("OTHER", LoanType::Commercial),
        ])
        .await;
    h.analytical
        .seed_table(DATABASE, LOANS_TABLE, vec![vec![json!("OLD")]])
        .await;
    h.add_credit(credit("N1")).await;
    h.add_credit(credit("N2")).await;

    let batch = h.run(None).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Success);

    let mut ids = external_ids(&h.relational.rows().await);
    ids.sort();
    assert_eq!(ids, vec!["N1", "N2", "OTHER"]);

    let published = h.analytical.table_rows(DATABASE, LOANS_TABLE).await.unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0][0], json!("N1"));

    let statements = h.analytical.statements().await;
    assert!(statements.iter().any(|s| s.starts_with("EXCHANGE TABLES")));
    assert!(!statements.iter().any(|s| s.starts_with("RENAME TABLE")));
    assert_eq!(h.analytical.table_names(DATABASE).await, vec![LOANS_TABLE]);
}

#[tokio::test]
async fn test_payment_plan_run() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;
    h.add_plan(plan("L1", 1)).await;
    h.add_plan(plan("L1", 2)).await;

    let batch = h.run(Some("payment_plan")).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Success);
    assert_eq!(batch.record_count, 2);

    let rows = h.relational.rows().await;
    assert_eq!(external_ids(&rows), vec!["L1#1", "L1#2"]);
    let RelationalRecord::PaymentPlan(first) = &rows[0] else {
        panic!("expected a payment plan row");
    };
    assert_eq!(first.installment_amount, BigDecimal::from_str("250.755").unwrap());
    assert_eq!(first.payload["installment_amount"], json!("250.755"));

    let published = h.analytical.table_rows(DATABASE, PLANS_TABLE).await.unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[0][column(DatasetKind::PaymentPlan, "installment_amount")],
        json!("250.76")
    );
    assert_eq!(
        published[1][column(DatasetKind::PaymentPlan, "installment_number")],
        json!(2)
    );
    assert!(!h.analytical.has_table(DATABASE, LOANS_TABLE).await);
}

#[tokio::test]
async fn test_empty_source_succeeds_without_writes() {
    let h = Harness::new().await;

    let batch = h.run(None).await.unwrap();

    assert_eq!(batch.status, BatchStatus::Success);
    assert_eq!(batch.total_rows, 0);
    assert_eq!(batch.record_count, 0);
    assert!(batch.completed_at.is_some());
    assert!(h.analytical.statements().await.is_empty());
    assert_eq!(h.relational.commits().await, 0);
}

#[tokio::test]
async fn test_rows_are_flushed_in_chunks() {
    let h = Harness::new().await;
    for n in 1..=5 {
        h.add_credit(credit(&format!("L{n}"))).await;
    }

    let load = LoadConfig {
        chunk_size: 2,
        ..LoadConfig::default()
    };
    let ok = h
        .orchestrator()
        .with_load_config(load)
        .run("BANK001", "RETAIL", None, None)
        .await
        .unwrap();
    assert!(ok);

    assert_eq!(h.relational.insert_calls().await, 3);
    let inserts = h
        .analytical
        .statements()
        .await
        .into_iter()
        .filter(|s| s.starts_with("INSERT INTO"))
        .count();
    assert_eq!(inserts, 3);
    assert_eq!(h.relational.rows().await.len(), 5);
    assert_eq!(
        h.analytical.table_rows(DATABASE, LOANS_TABLE).await.unwrap().len(),
        5
    );
}

#[tokio::test]
async fn test_existing_started_batch_is_adopted() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;
    let batch_id = h.existing_batch().await;

    let batch = h
        .orchestrator()
        .run_batch("BANK001", "RETAIL", None, Some(batch_id))
        .await
        .unwrap();

    assert_eq!(batch.id, batch_id);
    assert_eq!(batch.status, BatchStatus::Success);
    assert_eq!(h.batches.batch_count().await, 1);
}

#[tokio::test]
async fn test_database_prefix_is_configurable() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;

    h.orchestrator()
        .with_database_prefix("analytics_")
        .run("BANK001", "RETAIL", None, None)
        .await
        .unwrap();

    assert!(h.analytical.has_table("analytics_bank001", LOANS_TABLE).await);
}

// ============================================================================
// Validation failures
// ============================================================================

#[tokio::test]
async fn test_invalid_row_rejects_whole_batch() {
    let h = Harness::new().await;
    h.relational
        .seed(vec![h.previous_loan("OLD", LoanType::Retail)])
        .await;
    h.add_credit(credit("L1")).await;
    h.add_credit(
        RawRow::new()
            .with("loan_account_number", "L2")
            .with("loan_status_code", "A")
            .with("original_loan_amount", "-5"),
    )
    .await;

    let batch = h.run(None).await.unwrap();

    assert_eq!(batch.status, BatchStatus::FailedValidation);
    assert_eq!(batch.total_rows, 2);
    assert_eq!(batch.valid_rows, 1);
    assert_eq!(batch.invalid_rows, 1);
    assert_eq!(batch.record_count, 0);
    assert_eq!(
        batch.error_message.as_deref(),
        Some("Validation failed for 1 rows.")
    );

    let errors = h.batches.list_errors(batch.id, None).await.unwrap();
    let found: Vec<(u64, ErrorKind, Option<&str>)> = errors
        .iter()
        .map(|e| (e.row_number, e.kind, e.field.as_deref()))
        .collect();
    assert_eq!(
        found,
        vec![
            (2, ErrorKind::OutOfRange, Some("original_loan_amount")),
            (2, ErrorKind::MissingField, Some("loan_start_date")),
        ]
    );
    assert!(errors.iter().all(|e| e.raw["loan_account_number"] == json!("L2")));

    assert_eq!(external_ids(&h.relational.rows().await), vec!["OLD"]);
    assert!(h.analytical.statements().await.is_empty());
    let credit_scope = scope("BANK001", LoanType::Retail, DatasetKind::Credit);
    assert_eq!(h.source.scans(&credit_scope).await, 1);
}

#[tokio::test]
async fn test_unknown_loan_reference() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;
    h.add_plan(plan("L1", 1)).await;
    h.add_plan(plan("L9", 1)).await;

    let ok = h
        .orchestrator()
        .run("BANK001", "RETAIL", Some("PAYMENT_PLAN"), None)
        .await
        .unwrap();
    assert!(!ok);

    let batch_id = h.batches.saves().await[0].0;
    let errors = h.batches.list_errors(batch_id, None).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_number, 2);
    assert_eq!(errors[0].kind, ErrorKind::UnknownLoanId);
    assert_eq!(
        errors[0].message,
        "Payment plan references unknown loan_account_number."
    );
    assert!(h.relational.rows().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_loan_rejects_batch() {
    let h = Harness::new().await;
    h.relational
        .seed(vec![h.previous_loan("OLD", LoanType::Retail)])
        .await;
    h.add_credit(credit("L1")).await;
    h.add_credit(credit("L2")).await;
    h.add_credit(credit(" L1 ")).await;

    let batch = h.run(None).await.unwrap();

    assert_eq!(batch.status, BatchStatus::FailedValidation);
    assert_eq!(batch.valid_rows, 2);
    assert_eq!(batch.invalid_rows, 1);
    let errors = h.batches.list_errors(batch.id, None).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_number, 3);
    assert_eq!(errors[0].kind, ErrorKind::DuplicateKey);
    assert_eq!(errors[0].message, "Duplicate of row 1: L1");

    assert_eq!(external_ids(&h.relational.rows().await), vec!["OLD"]);
    assert!(h.analytical.statements().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_installment_rejects_batch() {
    let h = Harness::new().await;
    h.add_credit(credit("L1")).await;
    h.add_plan(plan("L1", 1)).await;
    h.add_plan(plan("L1", 2)).await;
    h.add_plan(plan("L1", 2)).await;

    let batch = h.run(Some("PAYMENT_PLAN")).await.unwrap();

    assert_eq!(batch.status, BatchStatus::FailedValidation);
    assert_eq!(batch.invalid_rows, 1);
    let errors = h.batches.list_errors(batch.id, None).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!((errors[0].row_number, errors[0].kind), (3, ErrorKind::DuplicateKey));
    assert!(h.relational.rows().await.is_empty());
}

#[tokio::test]
async fn test_credit_of_other_loan_type_is_not_a_reference() {
    let h = Harness::new().await;
    h.source
        .add_credit("BANK001", LoanType::Commercial, credit("L1"))
        .await;
    h.add_plan(plan("L1", 1)).await;

    let batch = h.run(Some("PAYMENT_PLAN")).await.unwrap();
    assert_eq!(batch.status, BatchStatus::FailedValidation);
    assert_eq!(batch.invalid_rows, 1);
}

// ============================================================================
// Input and infrastructure errors
// ============================================================================

#[tokio::test]
async fn test_input_errors_leave_no_batch() {
    let h = Harness::new().await;
    let orchestrator = h.orchestrator();

    for (tenant, loan_type, dataset) in [
        ("  ", "RETAIL", None),
        ("BANK001", "", None),
        ("BANK001", "RETAIL", Some("INVOICES")),
        ("BANK404", "RETAIL", None),
    ] {
        let err = orchestrator
            .run(tenant, loan_type, dataset, None)
            .await
            .unwrap_err();
        assert!(err.is_input_error(), "{err}");
    }

    let err = orchestrator
        .run("BANK001", "RETAIL", None, Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::BatchNotFound(_)));

    assert_eq!(h.batches.batch_count().await, 0);
    assert!(h.batches.saves().await.is_empty());
}

#[tokio::test]
async fn test_finished_batch_cannot_be_rerun() {
    let h = Harness::new().await;
    let batch = h.run(None).await.unwrap();
    let saves = h.batches.saves().await.len();

    let err = h
        .orchestrator()
        .run_batch("BANK001", "RETAIL", None, Some(batch.id))
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::IllegalTransition { .. }));
    assert_eq!(h.batches.saves().await.len(), saves);
}

#[tokio::test]
async fn test_analytical_failure_rolls_back_relational() {
    let h = Harness::new().await;
    h.relational
        .seed(vec![h.previous_loan("OLD", LoanType::Retail)])
        .await;
    h.add_credit(credit("L1")).await;
    h.analytical.fail_on("INSERT INTO").await;
    let batch_id = h.existing_batch().await;

    let err = h
        .orchestrator()
        .run("BANK001", "RETAIL", None, Some(batch_id))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Analytical { status: 500, .. }));

    let batch = h.batches.load(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("System Error: "));
    assert!(batch.completed_at.is_some());

    assert_eq!(h.relational.commits().await, 0);
    assert_eq!(external_ids(&h.relational.rows().await), vec!["OLD"]);
    assert!(h.analytical.table_names(DATABASE).await.is_empty());
}

#[tokio::test]
async fn test_next_run_drops_staging_left_by_crashed_run() {
    let h = Harness::new().await;
    let leftover = format!("{LOANS_TABLE}_staging");
    h.analytical
        .seed_table(DATABASE, &leftover, vec![vec![json!("HALF WRITTEN")]])
        .await;
    h.add_credit(credit("L1")).await;

    let batch = h.run(None).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Success);
    assert_eq!(h.analytical.table_names(DATABASE).await, vec![LOANS_TABLE]);
    let published = h.analytical.table_rows(DATABASE, LOANS_TABLE).await.unwrap();
    assert_eq!(published.len(), 1);
}

#[tokio::test]
async fn test_commit_failure_keeps_previous_snapshot() {
    let h = Harness::new().await;
    h.analytical
        .seed_table(DATABASE, LOANS_TABLE, vec![vec![json!("OLD")]])
        .await;
    h.add_credit(credit("L1")).await;
    h.relational.fail_commits(true).await;
    let batch_id = h.existing_batch().await;

    let err = h
        .orchestrator()
        .run("BANK001", "RETAIL", None, Some(batch_id))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Database(_)));

    let batch = h.batches.load(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    let published = h.analytical.table_rows(DATABASE, LOANS_TABLE).await.unwrap();
    assert_eq!(published, vec![vec![json!("OLD")]]);
}

#[tokio::test]
async fn test_source_change_between_passes_fails_run() {
    let h = Harness::new().await;
    h.relational
        .seed(vec![h.previous_loan("OLD", LoanType::Retail)])
        .await;
    h.add_credit(credit("L1")).await;
    h.source
        .change_after_first_scan(
            &scope("BANK001", LoanType::Retail, DatasetKind::Credit),
            vec![credit("L1"), RawRow::new().with("loan_account_number", "L2")],
        )
        .await;
    let batch_id = h.existing_batch().await;

    let err = h
        .orchestrator()
        .run("BANK001", "RETAIL", None, Some(batch_id))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SourceChanged { row: 2, .. }));

    let batch = h.batches.load(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(external_ids(&h.relational.rows().await), vec!["OLD"]);
    assert!(!h.analytical.has_table(DATABASE, LOANS_TABLE).await);
}
